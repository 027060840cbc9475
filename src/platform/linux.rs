//! TCP owner lookup through procfs.

use crate::adapter::IpFamily;
use crate::error::Result;
use crate::ports::TcpTable;
use std::path::PathBuf;

/// [`TcpTable`] over `/proc/net/tcp{,6}` and `/proc/<pid>/fd`.
#[derive(Debug, Clone)]
pub struct ProcTcpTable {
    root: PathBuf,
}

impl ProcTcpTable {
    /// Reads the live `/proc`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    /// Reads a procfs tree mounted at `root`.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn socket_owner(&self, inode: u64) -> Result<u32> {
        let wanted = format!("socket:[{inode}]");
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };
            // Other users' fd tables are unreadable; skip them.
            let Ok(fds) = std::fs::read_dir(entry.path().join("fd")) else {
                continue;
            };
            for fd in fds.flatten() {
                if std::fs::read_link(fd.path()).is_ok_and(|target| target.as_os_str() == wanted.as_str()) {
                    return Ok(pid);
                }
            }
        }
        Ok(0)
    }
}

impl Default for ProcTcpTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpTable for ProcTcpTable {
    fn owner_pid(&self, port: u16, family: IpFamily) -> Result<u32> {
        let table = match family {
            IpFamily::V4 => "tcp",
            IpFamily::V6 => "tcp6",
        };
        let path = self.root.join("net").join(table);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            // No IPv6 stack.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        for inode in socket_inodes(&content, port) {
            let pid = self.socket_owner(inode)?;
            if pid != 0 {
                return Ok(pid);
            }
        }
        Ok(0)
    }
}

/// Inodes of sockets in a `/proc/net/tcp` table bound locally to `port`.
/// Sockets without an inode (`TIME_WAIT`) are skipped.
fn socket_inodes(table: &str, port: u16) -> Vec<u64> {
    table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let local = fields.get(1)?;
            let (_, port_hex) = local.rsplit_once(':')?;
            let local_port = u16::from_str_radix(port_hex, 16).ok()?;
            let inode = fields.get(9)?.parse::<u64>().ok()?;
            (local_port == port && inode != 0).then_some(inode)
        })
        .collect()
}
