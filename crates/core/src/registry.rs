//! Session storage: a generational slab.
//!
//! The reference implementation keeps two parallel, tombstoned C arrays (one
//! of `pollfd`, one of session pointers) and periodically sweep-compacts
//! them. A slab with `Option`-tagged slots gets the same property — a freed
//! slot is simply skipped by iteration — without needing a separate
//! compaction pass, and a `(index, generation)` handle lets a session hold a
//! non-owning reference to its RTP/RTCP sibling without `Rc`/`Arc`.

use std::collections::HashMap;

use crate::error::Result;
use crate::ports::PortAllocator;
use crate::session::{Session, SessionHandle, CALLEE, CALLER};

enum Slot {
    Occupied { generation: u64, session: Session },
    Vacant { generation: u64 },
}

/// Owns every live [`Session`] plus the port pool they were allocated from.
///
/// Mirrors the "session-list lock" boundary: callers that hold a
/// `&mut SessionSlab` are expected to hold that lock for no longer than an
/// insert/remove/lookup, never across a send.
pub struct SessionSlab {
    entries: Vec<Slot>,
    free: Vec<usize>,
    ports: PortAllocator,
    by_port: HashMap<u16, SessionHandle>,
}

impl SessionSlab {
    pub fn new(port_min: u16, port_max: u16) -> Self {
        SessionSlab {
            entries: Vec::new(),
            free: Vec::new(),
            ports: PortAllocator::new(port_min, port_max),
            by_port: HashMap::new(),
        }
    }

    pub fn available_ports(&self) -> usize {
        self.ports.available()
    }

    pub fn allocate_port(&mut self) -> Result<u16> {
        self.ports.allocate()
    }

    /// Insert a fully-built session, stamping its handle and registering its
    /// callee port for `lookup_by_port`.
    pub fn insert(&mut self, mut session: Session, callee_port: u16) -> SessionHandle {
        let handle = match self.free.pop() {
            Some(index) => {
                let generation = match &self.entries[index] {
                    Slot::Vacant { generation } => *generation + 1,
                    Slot::Occupied { .. } => unreachable!("free list pointed at occupied slot"),
                };
                let handle = SessionHandle { index, generation };
                session.handle = Some(handle);
                self.entries[index] = Slot::Occupied { generation, session };
                handle
            }
            None => {
                let index = self.entries.len();
                let generation = 0;
                let handle = SessionHandle { index, generation };
                session.handle = Some(handle);
                self.entries.push(Slot::Occupied { generation, session });
                handle
            }
        };
        self.by_port.insert(callee_port, handle);
        handle
    }

    pub fn get(&self, handle: SessionHandle) -> Option<&Session> {
        match self.entries.get(handle.index)? {
            Slot::Occupied { generation, session } if *generation == handle.generation => {
                Some(session)
            }
            _ => None,
        }
    }

    pub fn get_mut(&mut self, handle: SessionHandle) -> Option<&mut Session> {
        match self.entries.get_mut(handle.index)? {
            Slot::Occupied { generation, session } if *generation == handle.generation => {
                Some(session)
            }
            _ => None,
        }
    }

    /// Borrow two distinct sessions mutably at once, needed to thread an
    /// RTP session's peer address into its sibling RTCP session for RTCP
    /// port inference. Returns `None` if either handle is stale or the two
    /// handles name the same slot.
    pub fn get_two_mut(
        &mut self,
        a: SessionHandle,
        b: SessionHandle,
    ) -> Option<(&mut Session, &mut Session)> {
        if a.index == b.index {
            return None;
        }
        let (lo, hi) = if a.index < b.index { (a, b) } else { (b, a) };
        let (left, right) = self.entries.split_at_mut(hi.index);
        let first = match left.get_mut(lo.index)? {
            Slot::Occupied { generation, session } if *generation == lo.generation => session,
            _ => return None,
        };
        let second = match right.first_mut()? {
            Slot::Occupied { generation, session } if *generation == hi.generation => session,
            _ => return None,
        };
        if a.index < b.index {
            Some((first, second))
        } else {
            Some((second, first))
        }
    }

    pub fn lookup_by_port(&self, port: u16) -> Option<SessionHandle> {
        self.by_port.get(&port).copied()
    }

    /// Remove a session and, if it has one, its RTP<->RTCP sibling,
    /// releasing every removed leg's ports back to the pool. Deletion frees
    /// both sibling entries atomically under the global lock: returns every
    /// session actually removed (the sibling too, when present), so the
    /// caller can run teardown notifications on them.
    pub fn remove(&mut self, handle: SessionHandle) -> Vec<Session> {
        let mut removed = Vec::new();
        let Some(session) = self.remove_one(handle) else {
            return removed;
        };
        let sibling = session.sibling;
        removed.push(session);
        if let Some(sibling) = sibling {
            if let Some(sibling_session) = self.remove_one(sibling) {
                removed.push(sibling_session);
            }
        }
        removed
    }

    fn remove_one(&mut self, handle: SessionHandle) -> Option<Session> {
        let slot = self.entries.get_mut(handle.index)?;
        let session = match slot {
            Slot::Occupied { generation, .. } if *generation == handle.generation => {
                let Slot::Occupied { session, .. } =
                    std::mem::replace(slot, Slot::Vacant { generation: handle.generation })
                else {
                    unreachable!()
                };
                session
            }
            _ => return None,
        };
        self.free.push(handle.index);
        let callee_port = session.legs[CALLEE].local_port;
        self.by_port.remove(&callee_port);
        self.ports.release(callee_port);
        if session.complete {
            self.ports.release(session.legs[CALLER].local_port);
        }
        Some(session)
    }

    /// Iterate every live session along with its handle, for the reactor's
    /// poll-array build and TTL sweep.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SessionHandle, &mut Session)> {
        self.entries.iter_mut().enumerate().filter_map(|(index, slot)| match slot {
            Slot::Occupied { generation, session } => Some((
                SessionHandle {
                    index,
                    generation: *generation,
                },
                session,
            )),
            Slot::Vacant { .. } => None,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Leg, SessionKind};

    fn new_session() -> Session {
        let leg = Leg::bind("127.0.0.1", 0).unwrap();
        Session::new(SessionKind::Rtp, "call-1".to_string(), leg)
    }

    #[test]
    fn insert_then_get_round_trips() {
        let mut slab = SessionSlab::new(10000, 10010);
        let handle = slab.insert(new_session(), 10000);
        assert!(slab.get(handle).is_some());
        assert_eq!(slab.lookup_by_port(10000), Some(handle));
    }

    #[test]
    fn remove_frees_slot_and_port() {
        let mut slab = SessionSlab::new(10000, 10000);
        let port = slab.allocate_port().unwrap();
        let handle = slab.insert(new_session(), port);
        assert_eq!(slab.remove(handle).len(), 1);
        assert!(slab.get(handle).is_none());
        assert_eq!(slab.available_ports(), 1);
    }

    #[test]
    fn remove_frees_sibling_pair_together() {
        let mut slab = SessionSlab::new(10000, 10010);
        let rtp_port = slab.allocate_port().unwrap();
        let rtp = slab.insert(new_session(), rtp_port);
        let rtcp_port = slab.allocate_port().unwrap();
        let rtcp = slab.insert(
            Session::new(SessionKind::Rtcp, "call-1".to_string(), Leg::bind("127.0.0.1", 0).unwrap()),
            rtcp_port,
        );
        slab.get_mut(rtp).unwrap().sibling = Some(rtcp);
        slab.get_mut(rtcp).unwrap().sibling = Some(rtp);

        let removed = slab.remove(rtp);
        assert_eq!(removed.len(), 2);
        assert!(slab.get(rtp).is_none());
        assert!(slab.get(rtcp).is_none());
    }

    #[test]
    fn reused_slot_bumps_generation() {
        let mut slab = SessionSlab::new(10000, 10010);
        let h1 = slab.insert(new_session(), 10000);
        slab.remove(h1);
        let h2 = slab.insert(new_session(), 10002);
        assert_eq!(h1.index, h2.index);
        assert_ne!(h1.generation, h2.generation);
        assert!(slab.get(h1).is_none());
        assert!(slab.get(h2).is_some());
    }

    #[test]
    fn len_tracks_live_sessions_only() {
        let mut slab = SessionSlab::new(10000, 10010);
        let h1 = slab.insert(new_session(), 10000);
        let _h2 = slab.insert(new_session(), 10002);
        assert_eq!(slab.len(), 2);
        slab.remove(h1);
        assert_eq!(slab.len(), 1);
    }
}
