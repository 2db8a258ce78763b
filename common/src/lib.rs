use serde::{Deserialize, Serialize};

pub mod client;
pub mod codec;
pub mod tls;

/// Fully qualified name of the listing procedure.
pub const LS_METHOD: &str = "Ls.Ls";

// Common types shared between client and server
pub mod types {
    use super::*;

    /// Metadata for one filesystem entry, as reported by `Ls.Ls`.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct FileEntry {
        pub name: String,
        pub size: u64,
        /// `ls -l` style type and permission string, e.g. `drwxr-xr-x`.
        pub mode: String,
        /// Server local time, e.g. `Jan  2 15:04`.
        pub mod_time: String,
    }

    /// The root entry followed by its immediate children.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct FileList {
        pub entries: Vec<FileEntry>,
    }

    impl FileList {
        pub fn len(&self) -> usize {
            self.entries.len()
        }

        pub fn is_empty(&self) -> bool {
            self.entries.is_empty()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::types::{FileEntry, FileList};

    fn entry(name: &str) -> FileEntry {
        FileEntry {
            name: name.to_string(),
            size: 0,
            mode: "-rw-r--r--".to_string(),
            mod_time: "Jan  2 15:04".to_string(),
        }
    }

    #[test]
    fn counts_root_and_children() {
        let list = FileList {
            entries: vec![entry("x"), entry("a.txt"), entry("b")],
        };
        assert_eq!(list.len(), 3);
        assert!(!list.is_empty());
        assert!(FileList::default().is_empty());
    }
}
