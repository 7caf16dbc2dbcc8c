//! Concurrent address book of peer nodes.

use std::collections::HashSet;
use std::sync::RwLock;

/// A set of `host:port` peer addresses that is safe for concurrent
/// access. The node's own address is never included.
#[derive(Debug)]
pub struct PeerSet {
    addrs: RwLock<HashSet<String>>,
    host_addr: String,
}

impl PeerSet {
    /// Returns a peer set seeded with the given addresses.
    pub fn new(host_addr: &str, peer_addrs: &[String]) -> Self {
        let addrs = peer_addrs
            .iter()
            .filter(|addr| addr.as_str() != host_addr)
            .cloned()
            .collect();

        PeerSet {
            addrs: RwLock::new(addrs),
            host_addr: host_addr.to_string(),
        }
    }

    /// Includes the peers passed to the list.
    /// Returns the updated number of peers in the list.
    pub fn add(&self, addrs: &[String]) -> usize {
        let mut set = self.addrs.write().unwrap();
        for addr in addrs {
            if *addr != self.host_addr {
                set.insert(addr.clone());
            }
        }
        set.len()
    }

    /// Whether the peer is part of the list.
    pub fn contains(&self, addr: &str) -> bool {
        self.addrs.read().unwrap().contains(addr)
    }

    /// Returns the list of peer nodes.
    pub fn list(&self) -> Vec<String> {
        self.addrs.read().unwrap().iter().cloned().collect()
    }

    /// Calls `f` on each node in the peer list.
    ///
    /// It iterates over a snapshot of the list instead of the underlying
    /// set, so `f` may add or remove peers while iterating.
    pub fn for_each<F, E>(&self, mut f: F) -> Result<(), E>
    where
        F: FnMut(&str) -> Result<(), E>,
    {
        for addr in self.list() {
            f(&addr)?;
        }
        Ok(())
    }

    /// Takes the peers out of the list. Returns the updated number of
    /// peers remaining.
    pub fn remove(&self, addrs: &[String]) -> usize {
        let mut set = self.addrs.write().unwrap();
        for addr in addrs {
            set.remove(addr);
        }
        set.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn excludes_own_address() {
        let peers = PeerSet::new("node1:3000", &strings(&["node1:3000", "node2:4000"]));
        assert!(!peers.contains("node1:3000"));
        assert!(peers.contains("node2:4000"));

        assert_eq!(peers.add(&strings(&["node1:3000"])), 1);
        assert!(!peers.contains("node1:3000"));
    }

    #[test]
    fn add_and_remove() {
        let peers = PeerSet::new("node1:3000", &[]);
        assert_eq!(peers.add(&strings(&["node2:4000", "node3:5000"])), 2);
        assert_eq!(peers.remove(&strings(&["node2:4000"])), 1);
        assert!(!peers.contains("node2:4000"));
        assert!(peers.contains("node3:5000"));
    }

    #[test]
    fn for_each_allows_removal() {
        let peers = PeerSet::new("node1:3000", &strings(&["node2:4000", "node3:5000"]));

        peers
            .for_each(|addr| {
                // Simulates dropping unreachable peers at send time.
                peers.remove(&[addr.to_string()]);
                Ok::<(), ()>(())
            })
            .unwrap();

        assert!(peers.list().is_empty());
    }
}
