//! Layout of every key a group writes to its store.

/// Derives store keys, optionally under a namespace shared by every member of a group.
#[derive(Debug, Clone, Default)]
pub(crate) struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(namespace: Option<&str>) -> Self {
        let prefix = match namespace {
            Some(namespace) if !namespace.is_empty() => format!("{namespace}/"),
            _ => String::new(),
        };

        Self { prefix }
    }

    /// The prefix shared by every announcement of barrier round `round`.
    pub fn barrier_round(&self, round: u64) -> String {
        format!("{}barrier/{round}", self.prefix)
    }

    pub fn rendezvous(&self, rank: usize) -> String {
        format!("{}rendezvous/{rank}", self.prefix)
    }

    /// The key of the `seq`-th object `src` sends to `dst`.
    pub fn send_to(&self, dst: usize, src: usize, seq: u64) -> String {
        format!("{}send_to/{dst}/{src}/{seq}", self.prefix)
    }

    pub fn broadcast_from(&self, src: usize, seq: u64) -> String {
        format!("{}broadcast_from/{src}/{seq}", self.prefix)
    }
}
