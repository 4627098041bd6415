//! Breakpoint and watchpoint table.
//!
//! Rows are only inserted or removed once the debugger has confirmed the
//! change, either in the result of our own command or through a
//! `=breakpoint-*` notification. Hit counts are owned here and only ever
//! incremented by [`BreakpointManager::record_hit`].

use std::collections::BTreeMap;

use mifront_mi::{quote, Results, Value};
use serde::Serialize;

/// Debugger-assigned breakpoint number.
pub type BreakpointId = u32;

/// What triggers a watchpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WatchAccess {
    Write,
    Read,
    Access,
}

impl WatchAccess {
    fn flag(self) -> Option<&'static str> {
        match self {
            WatchAccess::Write => None,
            WatchAccess::Read => Some("-r"),
            WatchAccess::Access => Some("-a"),
        }
    }
}

/// Breakpoint flavour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BreakpointKind {
    /// Code location breakpoint.
    Breakpoint,
    /// Data watchpoint on an expression.
    Watchpoint {
        access: WatchAccess,
        expression: String,
    },
}

/// What happens to a breakpoint once hit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Disposition {
    #[default]
    Keep,
    Delete,
    Disable,
}

impl Disposition {
    fn from_mi(disp: &str) -> Self {
        match disp {
            "del" => Disposition::Delete,
            "dis" => Disposition::Disable,
            _ => Disposition::Keep,
        }
    }
}

/// One breakpoint row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Breakpoint {
    pub id: BreakpointId,
    pub kind: BreakpointKind,
    pub file: Option<String>,
    pub fullname: Option<String>,
    pub line: Option<u32>,
    pub function: Option<String>,
    pub address: Option<String>,
    pub condition: Option<String>,
    pub enabled: bool,
    pub ignore_count: u32,
    /// Counted from stop events only.
    pub hit_count: u32,
    pub disposition: Disposition,
}

impl Breakpoint {
    /// Build from a `bkpt={...}` tuple.
    ///
    /// The debugger's own `times` counter is ignored; hit counts start at
    /// zero and are maintained by the manager.
    pub fn from_mi(value: &Value) -> Option<Self> {
        let id = value.get_parsed("number")?;
        let kind = match value.get_str("type") {
            Some(ty) if ty.contains("watchpoint") => {
                let access = if ty.starts_with("read") {
                    WatchAccess::Read
                } else if ty.starts_with("acc") {
                    WatchAccess::Access
                } else {
                    WatchAccess::Write
                };
                BreakpointKind::Watchpoint {
                    access,
                    expression: value
                        .get_str("what")
                        .or_else(|| value.get_str("exp"))
                        .unwrap_or_default()
                        .to_string(),
                }
            }
            _ => BreakpointKind::Breakpoint,
        };
        Some(Self {
            id,
            kind,
            file: value.get_str("file").map(str::to_string),
            fullname: value.get_str("fullname").map(str::to_string),
            line: value.get_parsed("line"),
            function: value.get_str("func").map(str::to_string),
            address: value.get_str("addr").map(str::to_string),
            condition: value.get_str("cond").map(str::to_string),
            enabled: value.get_str("enabled") != Some("n"),
            ignore_count: value.get_parsed("ignore").unwrap_or(0),
            hit_count: 0,
            disposition: value
                .get_str("disp")
                .map(Disposition::from_mi)
                .unwrap_or_default(),
        })
    }

    /// Build from the `wpt`, `hw-rwpt` or `hw-awpt` tuple of a
    /// `-break-watch` result.
    fn from_watch_result(value: &Value, access: WatchAccess) -> Option<Self> {
        Some(Self {
            id: value.get_parsed("number")?,
            kind: BreakpointKind::Watchpoint {
                access,
                expression: value.get_str("exp").unwrap_or_default().to_string(),
            },
            file: None,
            fullname: None,
            line: None,
            function: None,
            address: None,
            condition: None,
            enabled: true,
            ignore_count: 0,
            hit_count: 0,
            disposition: Disposition::Keep,
        })
    }

    pub fn is_watchpoint(&self) -> bool {
        matches!(self.kind, BreakpointKind::Watchpoint { .. })
    }
}

// ---------------------------------------------------------------------------
// Command text
// ---------------------------------------------------------------------------

/// `-break-insert` for `file:line`.
pub fn insert_command(file: &str, line: u32, condition: Option<&str>, enabled: bool) -> String {
    insert_location(&format!("{file}:{line}"), condition, enabled)
}

/// `-break-insert` for a function name.
pub fn insert_function_command(function: &str, condition: Option<&str>) -> String {
    insert_location(function, condition, true)
}

fn insert_location(location: &str, condition: Option<&str>, enabled: bool) -> String {
    let mut cmd = String::from("-break-insert");
    if !enabled {
        cmd.push_str(" -d");
    }
    if let Some(cond) = condition {
        cmd.push_str(" -c ");
        cmd.push_str(&quote(cond));
    }
    cmd.push(' ');
    cmd.push_str(&quote(location));
    cmd
}

/// `-break-watch` for an expression.
pub fn watch_command(expression: &str, access: WatchAccess) -> String {
    match access.flag() {
        Some(flag) => format!("-break-watch {flag} {}", quote(expression)),
        None => format!("-break-watch {}", quote(expression)),
    }
}

/// `-break-delete`; no ids deletes every breakpoint.
pub fn delete_command(ids: &[BreakpointId]) -> String {
    join_ids("-break-delete", ids)
}

/// `-break-enable` or `-break-disable`.
pub fn enable_command(id: BreakpointId, enabled: bool) -> String {
    if enabled {
        format!("-break-enable {id}")
    } else {
        format!("-break-disable {id}")
    }
}

/// `-break-condition`; `None` clears the condition.
pub fn condition_command(id: BreakpointId, condition: Option<&str>) -> String {
    match condition {
        Some(cond) => format!("-break-condition {id} {cond}"),
        None => format!("-break-condition {id}"),
    }
}

/// `-break-after`.
pub fn ignore_command(id: BreakpointId, count: u32) -> String {
    format!("-break-after {id} {count}")
}

fn join_ids(cmd: &str, ids: &[BreakpointId]) -> String {
    let mut out = cmd.to_string();
    for id in ids {
        out.push(' ');
        out.push_str(&id.to_string());
    }
    out
}

// ---------------------------------------------------------------------------
// BreakpointManager
// ---------------------------------------------------------------------------

/// Confirmed breakpoints of one session, keyed by debugger id.
#[derive(Debug, Clone, Default)]
pub struct BreakpointManager {
    rows: BTreeMap<BreakpointId, Breakpoint>,
}

impl BreakpointManager {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract the breakpoint from a successful insert or watch result.
    pub fn parse_inserted(results: &Results) -> Option<Breakpoint> {
        if let Some(bkpt) = results.get("bkpt") {
            return Breakpoint::from_mi(bkpt);
        }
        [
            ("wpt", WatchAccess::Write),
            ("hw-rwpt", WatchAccess::Read),
            ("hw-awpt", WatchAccess::Access),
        ]
        .into_iter()
        .find_map(|(key, access)| {
            results
                .get(key)
                .and_then(|v| Breakpoint::from_watch_result(v, access))
        })
    }

    /// Insert or replace a row, keeping the hit count of an existing row.
    pub fn upsert(&mut self, mut bp: Breakpoint) -> &Breakpoint {
        let id = bp.id;
        if let Some(old) = self.rows.get(&id) {
            bp.hit_count = old.hit_count;
            let missing_expression = matches!(
                &bp.kind,
                BreakpointKind::Watchpoint { expression, .. } if expression.is_empty()
            );
            if missing_expression {
                bp.kind = old.kind.clone();
            }
        }
        tracing::debug!("breakpoint {} upserted", id);
        self.rows.insert(id, bp);
        &self.rows[&id]
    }

    /// Remove a row.
    pub fn remove(&mut self, id: BreakpointId) -> Option<Breakpoint> {
        self.rows.remove(&id)
    }

    pub fn get(&self, id: BreakpointId) -> Option<&Breakpoint> {
        self.rows.get(&id)
    }

    pub fn contains(&self, id: BreakpointId) -> bool {
        self.rows.contains_key(&id)
    }

    /// Rows in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Breakpoint> {
        self.rows.values()
    }

    pub fn ids(&self) -> Vec<BreakpointId> {
        self.rows.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Count one hit. Callers are responsible for stop-event dedup.
    pub fn record_hit(&mut self, id: BreakpointId) -> Option<&Breakpoint> {
        let bp = self.rows.get_mut(&id)?;
        bp.hit_count += 1;
        tracing::debug!("breakpoint {} hit ({} total)", id, bp.hit_count);
        Some(bp)
    }

    pub fn set_enabled(&mut self, id: BreakpointId, enabled: bool) -> Option<&Breakpoint> {
        let bp = self.rows.get_mut(&id)?;
        bp.enabled = enabled;
        Some(bp)
    }

    pub fn set_condition(
        &mut self,
        id: BreakpointId,
        condition: Option<String>,
    ) -> Option<&Breakpoint> {
        let bp = self.rows.get_mut(&id)?;
        bp.condition = condition;
        Some(bp)
    }

    pub fn set_ignore_count(&mut self, id: BreakpointId, count: u32) -> Option<&Breakpoint> {
        let bp = self.rows.get_mut(&id)?;
        bp.ignore_count = count;
        Some(bp)
    }

    /// Drop every row (session teardown).
    pub fn clear(&mut self) {
        self.rows.clear();
    }
}
