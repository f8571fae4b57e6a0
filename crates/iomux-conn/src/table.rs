use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use iomux_frame::ConnectionId;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::conn::VirtualConn;
use crate::diag::Diagnostics;
use crate::handshake::Rejection;
use crate::inbox::{self, InboxReceiver, InboxSender};
use crate::options::InboxPolicy;

/// Where routed payloads for one identifier go.
#[derive(Debug)]
pub(crate) struct Route {
    pub(crate) inbox: InboxSender,
    pub(crate) diagnostics: Diagnostics,
    generation: u64,
}

/// The installed listener, as seen by the demux loop.
#[derive(Debug)]
pub(crate) struct Acceptor {
    pub(crate) backlog: mpsc::Sender<VirtualConn>,
    pub(crate) scope: CancellationToken,
    pub(crate) inbox: InboxPolicy,
    pub(crate) max_connections: Option<usize>,
    pub(crate) diagnostics: Diagnostics,
}

/// An unknown identifier admitted by the listener. The route is already
/// in the table under `generation`.
pub(crate) struct Admission {
    pub(crate) inbox: InboxSender,
    pub(crate) receiver: InboxReceiver,
    pub(crate) generation: u64,
    pub(crate) scope: CancellationToken,
    pub(crate) backlog: mpsc::Sender<VirtualConn>,
    pub(crate) diagnostics: Diagnostics,
}

/// What the demux loop does with a frame.
pub(crate) enum Dispatch {
    Known {
        inbox: InboxSender,
        diagnostics: Diagnostics,
    },
    Admit(Admission),
    Reject {
        reason: Rejection,
        diagnostics: Diagnostics,
    },
    Unroutable,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TableError {
    Closed,
    Duplicate,
    AlreadyListening,
}

#[derive(Default)]
struct TableState {
    routes: HashMap<ConnectionId, Route>,
    acceptor: Option<Acceptor>,
    closed: bool,
    next_generation: u64,
}

impl TableState {
    fn insert(&mut self, id: ConnectionId, inbox: InboxSender, diagnostics: Diagnostics) -> u64 {
        self.next_generation += 1;
        let generation = self.next_generation;
        self.routes.insert(
            id,
            Route {
                inbox,
                diagnostics,
                generation,
            },
        );
        generation
    }
}

/// Identifier-to-connection map of one physical stream.
///
/// The lock is never held across an `.await`, and nothing that could
/// re-enter the table (dropping a `VirtualConn`) happens under it.
#[derive(Default)]
pub(crate) struct ConnectionTable {
    state: Mutex<TableState>,
}

impl ConnectionTable {
    fn state(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a locally created connection. Returns its generation.
    pub(crate) fn insert(
        &self,
        id: ConnectionId,
        inbox: InboxSender,
        diagnostics: Diagnostics,
    ) -> Result<u64, TableError> {
        let mut state = self.state();
        if state.closed {
            return Err(TableError::Closed);
        }
        if state.routes.contains_key(&id) {
            return Err(TableError::Duplicate);
        }
        Ok(state.insert(id, inbox, diagnostics))
    }

    /// Remove `id` if it is still the entry registered under `generation`.
    pub(crate) fn remove(&self, id: ConnectionId, generation: u64) -> Option<Route> {
        let mut state = self.state();
        match state.routes.get(&id) {
            Some(route) if route.generation == generation => state.routes.remove(&id),
            _ => None,
        }
    }

    pub(crate) fn install_acceptor(&self, acceptor: Acceptor) -> Result<(), TableError> {
        let mut state = self.state();
        if state.closed {
            return Err(TableError::Closed);
        }
        if state.acceptor.is_some() {
            return Err(TableError::AlreadyListening);
        }
        state.acceptor = Some(acceptor);
        Ok(())
    }

    /// Decide how to route a frame for `id`, admitting it if a listener
    /// has room for it.
    pub(crate) fn dispatch(&self, id: ConnectionId) -> Dispatch {
        let mut state = self.state();
        if state.closed {
            return Dispatch::Closed;
        }
        if let Some(route) = state.routes.get(&id) {
            return Dispatch::Known {
                inbox: route.inbox.clone(),
                diagnostics: route.diagnostics.clone(),
            };
        }

        let live = state.routes.len();
        let Some(acceptor) = state.acceptor.as_ref() else {
            return Dispatch::Unroutable;
        };
        if acceptor.backlog.is_closed() {
            return Dispatch::Unroutable;
        }
        let rejection = if acceptor.max_connections.is_some_and(|max| live >= max) {
            Some(Rejection::ConnectionLimit)
        } else if acceptor.backlog.capacity() == 0 {
            Some(Rejection::BacklogFull)
        } else {
            None
        };
        if let Some(reason) = rejection {
            return Dispatch::Reject {
                reason,
                diagnostics: acceptor.diagnostics.clone(),
            };
        }

        let (inbox, receiver) = inbox::channel(acceptor.inbox);
        let scope = acceptor.scope.clone();
        let backlog = acceptor.backlog.clone();
        let diagnostics = acceptor.diagnostics.clone();
        let generation = state.insert(id, inbox.clone(), diagnostics.clone());
        Dispatch::Admit(Admission {
            inbox,
            receiver,
            generation,
            scope,
            backlog,
            diagnostics,
        })
    }

    /// Close the table for good, handing back everything it held so the
    /// caller can drop it outside the lock.
    pub(crate) fn drain(&self) -> (Vec<Route>, Option<Acceptor>) {
        let mut state = self.state();
        state.closed = true;
        let routes = state.routes.drain().map(|(_, route)| route).collect();
        (routes, state.acceptor.take())
    }

    pub(crate) fn len(&self) -> usize {
        self.state().routes.len()
    }

    pub(crate) fn contains(&self, id: &ConnectionId) -> bool {
        self.state().routes.contains_key(id)
    }

    pub(crate) fn has_acceptor(&self) -> bool {
        self.state().acceptor.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> ConnectionId {
        ConnectionId::from_bytes([byte; 16])
    }

    fn route_parts() -> (InboxSender, Diagnostics) {
        let (tx, _rx) = inbox::channel(InboxPolicy::Unbounded);
        (tx, Diagnostics::null())
    }

    fn acceptor(capacity: usize, max: Option<usize>) -> (Acceptor, mpsc::Receiver<VirtualConn>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Acceptor {
                backlog: tx,
                scope: CancellationToken::new(),
                inbox: InboxPolicy::Unbounded,
                max_connections: max,
                diagnostics: Diagnostics::null(),
            },
            rx,
        )
    }

    #[test]
    fn insert_rejects_duplicates() {
        let table = ConnectionTable::default();
        let (tx, diag) = route_parts();
        table.insert(id(1), tx.clone(), diag.clone()).unwrap();
        assert_eq!(table.insert(id(1), tx, diag), Err(TableError::Duplicate));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn stale_generation_does_not_remove_newer_entry() {
        let table = ConnectionTable::default();
        let (tx, diag) = route_parts();
        let old = table.insert(id(2), tx.clone(), diag.clone()).unwrap();
        assert!(table.remove(id(2), old).is_some());

        let new = table.insert(id(2), tx, diag).unwrap();
        assert_ne!(old, new);
        assert!(table.remove(id(2), old).is_none());
        assert!(table.contains(&id(2)));
        assert!(table.remove(id(2), new).is_some());
        assert!(!table.contains(&id(2)));
    }

    #[test]
    fn dispatch_without_listener_is_unroutable() {
        let table = ConnectionTable::default();
        assert!(matches!(table.dispatch(id(3)), Dispatch::Unroutable));

        let (tx, diag) = route_parts();
        table.insert(id(3), tx, diag).unwrap();
        assert!(matches!(table.dispatch(id(3)), Dispatch::Known { .. }));
    }

    #[test]
    fn dispatch_admits_and_registers() {
        let table = ConnectionTable::default();
        let (acc, _rx) = acceptor(4, None);
        table.install_acceptor(acc).unwrap();

        let Dispatch::Admit(admission) = table.dispatch(id(4)) else {
            panic!("unknown identifier should be admitted");
        };
        assert!(table.contains(&id(4)));
        assert!(table.remove(id(4), admission.generation).is_some());
    }

    #[test]
    fn dispatch_rejects_at_connection_limit() {
        let table = ConnectionTable::default();
        let (acc, _rx) = acceptor(4, Some(1));
        table.install_acceptor(acc).unwrap();

        assert!(matches!(table.dispatch(id(5)), Dispatch::Admit(_)));
        assert!(matches!(
            table.dispatch(id(6)),
            Dispatch::Reject {
                reason: Rejection::ConnectionLimit,
                ..
            }
        ));
        assert!(!table.contains(&id(6)));
    }

    #[test]
    fn second_acceptor_refused() {
        let table = ConnectionTable::default();
        let (first, _rx1) = acceptor(1, None);
        let (second, _rx2) = acceptor(1, None);
        table.install_acceptor(first).unwrap();
        assert_eq!(
            table.install_acceptor(second).unwrap_err(),
            TableError::AlreadyListening
        );
        assert!(table.has_acceptor());
    }

    #[test]
    fn drain_closes_table() {
        let table = ConnectionTable::default();
        let (tx, diag) = route_parts();
        table.insert(id(7), tx.clone(), diag.clone()).unwrap();
        let (acc, _rx) = acceptor(1, None);
        table.install_acceptor(acc).unwrap();

        let (routes, acceptor) = table.drain();
        assert_eq!(routes.len(), 1);
        assert!(acceptor.is_some());
        assert_eq!(table.len(), 0);
        assert!(matches!(table.dispatch(id(8)), Dispatch::Closed));
        assert_eq!(table.insert(id(9), tx, diag), Err(TableError::Closed));
    }
}
