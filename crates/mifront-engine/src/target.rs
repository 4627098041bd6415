//! What a session debugs and what it can read back from the target.

use std::collections::HashSet;
use std::fmt;

use mifront_mi::{quote, Results};
use serde::Serialize;

/// How the debugger reaches the program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchTarget {
    /// Load `program` and run it under the debugger.
    Local { program: String, args: Vec<String> },
    /// Attach to a live process. `program` supplies symbols when given.
    Attach { program: Option<String>, pid: u32 },
    /// Inspect a core file post mortem.
    CoreDump { program: String, core: String },
    /// Connect to a remote stub such as gdbserver.
    Remote {
        program: Option<String>,
        host: String,
        port: u16,
        /// Send `-target-download` after connecting.
        download: bool,
    },
}

impl LaunchTarget {
    pub fn local(program: &str, args: &[String]) -> Self {
        LaunchTarget::Local {
            program: program.to_string(),
            args: args.to_vec(),
        }
    }

    /// Executable whose symbols are loaded, if any.
    pub fn program(&self) -> Option<&str> {
        match self {
            LaunchTarget::Local { program, .. } | LaunchTarget::CoreDump { program, .. } => {
                Some(program)
            }
            LaunchTarget::Attach { program, .. } | LaunchTarget::Remote { program, .. } => {
                program.as_deref()
            }
        }
    }

    /// Whether connecting leaves the program stopped rather than not yet
    /// started.
    pub fn stops_on_connect(&self) -> bool {
        !matches!(self, LaunchTarget::Local { .. })
    }

    /// The command that establishes the target, `None` for a local program
    /// whose load is the last step.
    pub fn connect_command(&self) -> Option<String> {
        match self {
            LaunchTarget::Local { .. } => None,
            LaunchTarget::Attach { pid, .. } => Some(format!("-target-attach {pid}")),
            LaunchTarget::CoreDump { core, .. } => {
                Some(format!("-target-select core {}", quote(core)))
            }
            LaunchTarget::Remote { host, port, .. } => {
                Some(format!("-target-select remote {host}:{port}"))
            }
        }
    }
}

impl fmt::Display for LaunchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchTarget::Local { program, .. } => write!(f, "{program}"),
            LaunchTarget::Attach { pid, .. } => write!(f, "process {pid}"),
            LaunchTarget::CoreDump { core, .. } => write!(f, "core file {core}"),
            LaunchTarget::Remote { host, port, .. } => write!(f, "remote {host}:{port}"),
        }
    }
}

/// A source file of the loaded executable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFile {
    pub name: String,
    pub fullname: Option<String>,
}

impl SourceFile {
    /// Parse `-file-list-exec-source-files`, one entry per full path.
    /// Compiler-internal `<built-in>` entries are skipped.
    pub fn list_from_mi(results: &Results) -> Vec<Self> {
        let Some(list) = results.get("files") else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        list.items()
            .into_iter()
            .filter_map(|entry| {
                let name = entry.get_str("file")?;
                if name.contains("<built-in>") {
                    return None;
                }
                let fullname = entry.get_str("fullname").map(str::to_string);
                let key = fullname.clone().unwrap_or_else(|| name.to_string());
                seen.insert(key).then(|| SourceFile {
                    name: name.to_string(),
                    fullname,
                })
            })
            .collect()
    }
}

/// A contiguous run of readable target memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryBlock {
    pub address: u64,
    pub bytes: Vec<u8>,
}

pub fn read_memory_command(address: u64, count: usize) -> String {
    format!("-data-read-memory-bytes 0x{address:x} {count}")
}

impl MemoryBlock {
    /// Parse the `memory` list of `-data-read-memory-bytes`. Unreadable
    /// gaps simply have no block. Blocks come back ordered by address.
    pub fn list_from_mi(results: &Results) -> Option<Vec<Self>> {
        let list = results.get("memory")?;
        let mut blocks = Vec::new();
        for entry in list.items() {
            let begin = parse_address(entry.get_str("begin")?)?;
            let offset = entry.get_str("offset").map_or(Some(0), parse_address)?;
            let bytes = decode_hex(entry.get_str("contents")?)?;
            blocks.push(MemoryBlock {
                address: begin + offset,
                bytes,
            });
        }
        blocks.sort_by_key(|b| b.address);
        Some(blocks)
    }
}

fn parse_address(text: &str) -> Option<u64> {
    let digits = text.trim().trim_start_matches("0x");
    u64::from_str_radix(digits, 16).ok()
}

fn decode_hex(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(text.get(i..i + 2)?, 16).ok())
        .collect()
}
