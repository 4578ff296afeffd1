use serde::{Deserialize, Serialize};

/// An opaque command targeted at the application store.
///
/// The consensus core never interprets `cmd` or `args`; it forwards the key
/// to the dependency manager and the whole instruction to the store at apply
/// time. Keys may be hierarchical, with `:`-separated segments: a write to a
/// parent key interferes with accesses to its descendants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub cmd: String,
    pub key: String,
    pub args: Vec<String>,
    /// Client-supplied timestamp, milliseconds since the epoch.
    pub timestamp: u64,
}

impl Instruction {
    #[must_use]
    pub fn new(
        cmd: impl Into<String>,
        key: impl Into<String>,
        args: Vec<String>,
        timestamp: u64,
    ) -> Self {
        Self { cmd: cmd.into(), key: key.into(), args, timestamp }
    }

    /// The key split into its hierarchy segments.
    #[must_use]
    pub fn key_path(&self) -> Vec<&str> {
        self.key.split(':').collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_path_splits_segments() {
        let instr = Instruction::new("SET", "a:b:c", vec![], 0);
        assert_eq!(instr.key_path(), vec!["a", "b", "c"]);

        let flat = Instruction::new("SET", "a", vec![], 0);
        assert_eq!(flat.key_path(), vec!["a"]);
    }
}
