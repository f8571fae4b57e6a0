use iomux_frame::{DEFAULT_MAX_PAYLOAD, MAX_DATAGRAM_PAYLOAD};

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    println!("iomux {}", env!("CARGO_PKG_VERSION"));
    if !args.extended {
        return Ok(SUCCESS);
    }

    println!(
        "target: {}",
        option_env!("IOMUX_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("os: {}/{}", std::env::consts::OS, std::env::consts::ARCH);
    println!("framing.datagram.max_payload: {MAX_DATAGRAM_PAYLOAD}");
    println!("framing.length_prefixed.max_payload: {DEFAULT_MAX_PAYLOAD}");
    println!("unix_socket: {}", cfg!(unix));

    Ok(SUCCESS)
}
