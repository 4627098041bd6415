//! Session state: execution status, threads and the current stack.
//!
//! [`SessionState`] is only mutated while the engine applies a parsed
//! record. Every mutator reports whether anything actually changed so the
//! engine can decide what to publish.

use std::collections::BTreeMap;
use std::fmt;

use mifront_mi::{Results, Value};
use serde::Serialize;

use crate::breakpoints::BreakpointId;
use crate::error::EngineError;

/// Debugger-assigned thread id.
pub type ThreadId = u32;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Overall execution status of the debuggee.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    /// The debugger is up but the program has not been run.
    #[default]
    NotStarted,
    /// The program is executing.
    Running,
    /// The program is stopped (breakpoint, step, signal, interrupt).
    Stopped,
    /// The program or the debugger exited normally.
    Exited,
    /// The program was killed by a signal or the debugger died.
    TerminatedAbnormally,
}

impl SessionStatus {
    /// Whether no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Exited | SessionStatus::TerminatedAbnormally
        )
    }

    /// Whether `self -> to` is a legal edge (self-loops excluded).
    pub fn can_transition(self, to: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, to) {
            (from, _) if from.is_terminal() => false,
            (_, Exited | TerminatedAbnormally) => true,
            (NotStarted, Running) | (Running, Stopped) | (Stopped, Running) => true,
            // Attaching to a live process or opening a core file stops
            // without ever running.
            (NotStarted, Stopped) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStatus::NotStarted => "not started",
            SessionStatus::Running => "running",
            SessionStatus::Stopped => "stopped",
            SessionStatus::Exited => "exited",
            SessionStatus::TerminatedAbnormally => "terminated abnormally",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Threads and frames
// ---------------------------------------------------------------------------

/// Execution state of one thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThreadState {
    Running,
    Stopped,
}

/// A debuggee thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Thread {
    pub id: ThreadId,
    pub group_id: Option<String>,
    pub state: ThreadState,
    /// Reason of the last stop, e.g. `breakpoint-hit`.
    pub stop_reason: Option<String>,
    /// Target description, e.g. `Thread 0x7ffff7d8a740 (LWP 4242)`.
    pub target_id: Option<String>,
    pub name: Option<String>,
    /// Innermost frame as reported by the last stop or thread listing.
    pub frame: Option<StackFrame>,
}

impl Thread {
    /// A freshly created thread, assumed running.
    pub fn new(id: ThreadId, group_id: Option<String>) -> Self {
        Self {
            id,
            group_id,
            state: ThreadState::Running,
            stop_reason: None,
            target_id: None,
            name: None,
            frame: None,
        }
    }

    /// Build from an entry of `-thread-info`'s `threads` list.
    pub fn from_mi(value: &Value) -> Option<Self> {
        let id = value.get_parsed("id")?;
        let state = match value.get_str("state") {
            Some("running") => ThreadState::Running,
            _ => ThreadState::Stopped,
        };
        Some(Self {
            id,
            group_id: value.get_str("group-id").map(str::to_string),
            state,
            stop_reason: None,
            target_id: value.get_str("target-id").map(str::to_string),
            name: value.get_str("name").map(str::to_string),
            frame: value.get("frame").and_then(StackFrame::from_mi),
        })
    }
}

/// One frame of the current thread's stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackFrame {
    /// 0 is the innermost frame.
    pub level: u32,
    pub function: Option<String>,
    pub file: Option<String>,
    pub fullname: Option<String>,
    pub line: Option<u32>,
    pub address: Option<String>,
}

impl StackFrame {
    /// Build from a `frame={...}` tuple.
    pub fn from_mi(value: &Value) -> Option<Self> {
        value.as_results()?;
        Some(Self {
            level: value.get_parsed("level").unwrap_or(0),
            function: value.get_str("func").map(str::to_string),
            file: value.get_str("file").map(str::to_string),
            fullname: value.get_str("fullname").map(str::to_string),
            line: value.get_parsed("line"),
            address: value.get_str("addr").map(str::to_string),
        })
    }

    /// Parse the `stack` list of a `-stack-list-frames` result.
    pub fn list_from_mi(results: &Results) -> Vec<Self> {
        results
            .get("stack")
            .map(|stack| {
                stack
                    .items()
                    .into_iter()
                    .filter_map(StackFrame::from_mi)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// A local variable or argument of the selected frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Local {
    pub name: String,
    pub type_name: Option<String>,
    /// Only present for simple types.
    pub value: Option<String>,
    pub is_argument: bool,
}

impl Local {
    /// Parse the `variables` list of `-stack-list-variables --simple-values`.
    pub fn list_from_mi(results: &Results) -> Vec<Self> {
        let Some(list) = results.get("variables") else {
            return Vec::new();
        };
        list.items()
            .into_iter()
            .filter_map(|v| {
                Some(Self {
                    name: v.get_str("name")?.to_string(),
                    type_name: v.get_str("type").map(str::to_string),
                    value: v.get_str("value").map(str::to_string),
                    is_argument: v.get_str("arg") == Some("1"),
                })
            })
            .collect()
    }
}

/// A thread group (inferior process).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ThreadGroup {
    pub id: String,
    pub pid: Option<u32>,
    /// Exit code of the last run, decoded from GDB's octal.
    pub exit_code: Option<i32>,
    pub started: bool,
}

/// Identity of a stop event, used to discard duplicate deliveries.
///
/// `epoch` counts transitions into [`SessionStatus::Running`], so two stops
/// with the same breakpoint and thread in different runs differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StopIdentity {
    pub epoch: u64,
    pub breakpoint: Option<BreakpointId>,
    pub thread: Option<ThreadId>,
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// The authoritative model of debuggee state, minus breakpoints and
/// variable objects which have their own managers.
#[derive(Debug, Default)]
pub struct SessionState {
    status: SessionStatus,
    threads: BTreeMap<ThreadId, Thread>,
    groups: BTreeMap<String, ThreadGroup>,
    current_thread: Option<ThreadId>,
    current_frame: u32,
    frames: Vec<StackFrame>,
    run_epoch: u64,
    last_stop: Option<StopIdentity>,
    stop_reason: Option<String>,
}

impl SessionState {
    /// Create a state in [`SessionStatus::NotStarted`].
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Move to `to`.
    ///
    /// Returns `Ok(true)` when the status changed and `Ok(false)` for a
    /// self-loop or any event arriving in a terminal state.
    pub fn transition(&mut self, to: SessionStatus) -> Result<bool, EngineError> {
        let from = self.status;
        if from.is_terminal() {
            tracing::debug!("ignoring transition to {} after {}", to, from);
            return Ok(false);
        }
        if from == to {
            return Ok(false);
        }
        if !from.can_transition(to) {
            return Err(EngineError::IllegalTransition { from, to });
        }
        tracing::info!("session status: {} -> {}", from, to);
        self.status = to;
        if to == SessionStatus::Running {
            self.run_epoch += 1;
            self.stop_reason = None;
        }
        Ok(true)
    }

    /// Number of transitions into running so far.
    pub fn run_epoch(&self) -> u64 {
        self.run_epoch
    }

    /// Record a stop event. Returns `false` if it repeats the last one.
    pub fn register_stop(&mut self, identity: StopIdentity) -> bool {
        if self.last_stop == Some(identity) {
            tracing::debug!("duplicate stop event {:?}", identity);
            return false;
        }
        self.last_stop = Some(identity);
        true
    }

    /// Reason of the most recent stop.
    pub fn stop_reason(&self) -> Option<&str> {
        self.stop_reason.as_deref()
    }

    pub fn set_stop_reason(&mut self, reason: Option<&str>) {
        self.stop_reason = reason.map(str::to_string);
    }

    // -- threads ------------------------------------------------------------

    pub fn thread(&self, id: ThreadId) -> Option<&Thread> {
        self.threads.get(&id)
    }

    pub fn threads(&self) -> impl Iterator<Item = &Thread> {
        self.threads.values()
    }

    /// Add a thread. Returns `false` if it was already known.
    pub fn add_thread(&mut self, thread: Thread) -> bool {
        if self.threads.contains_key(&thread.id) {
            return false;
        }
        self.threads.insert(thread.id, thread);
        true
    }

    /// Remove a thread. Returns `true` if it existed.
    pub fn remove_thread(&mut self, id: ThreadId) -> bool {
        if self.current_thread == Some(id) {
            self.current_thread = None;
        }
        self.threads.remove(&id).is_some()
    }

    /// Set the state of the named threads, or every thread for `None`.
    ///
    /// Returns the ids whose state or stop reason changed.
    pub fn set_thread_states(
        &mut self,
        ids: Option<&[ThreadId]>,
        state: ThreadState,
        reason: Option<&str>,
    ) -> Vec<ThreadId> {
        let mut changed = Vec::new();
        for thread in self.threads.values_mut() {
            if ids.is_some_and(|ids| !ids.contains(&thread.id)) {
                continue;
            }
            let reason = match state {
                ThreadState::Stopped => reason.map(str::to_string),
                ThreadState::Running => None,
            };
            if thread.state != state || thread.stop_reason != reason {
                thread.state = state;
                thread.stop_reason = reason;
                if state == ThreadState::Running {
                    thread.frame = None;
                }
                changed.push(thread.id);
            }
        }
        changed
    }

    /// Set the innermost frame of a thread.
    pub fn set_thread_frame(&mut self, id: ThreadId, frame: Option<StackFrame>) -> bool {
        match self.threads.get_mut(&id) {
            Some(thread) if thread.frame != frame => {
                thread.frame = frame;
                true
            }
            _ => false,
        }
    }

    /// Replace the thread table from a `-thread-info` listing.
    ///
    /// Stop reasons are kept for threads that are still stopped. Returns
    /// every id that was added, changed or removed.
    pub fn replace_threads(&mut self, listed: Vec<Thread>) -> Vec<ThreadId> {
        let mut changed = Vec::new();
        let mut next = BTreeMap::new();
        for mut thread in listed {
            if let Some(old) = self.threads.get(&thread.id) {
                if thread.state == ThreadState::Stopped {
                    thread.stop_reason = old.stop_reason.clone();
                }
                if thread.group_id.is_none() {
                    thread.group_id = old.group_id.clone();
                }
            }
            if self.threads.get(&thread.id) != Some(&thread) {
                changed.push(thread.id);
            }
            next.insert(thread.id, thread);
        }
        for id in self.threads.keys() {
            if !next.contains_key(id) {
                changed.push(*id);
            }
        }
        self.threads = next;
        if let Some(current) = self.current_thread {
            if !self.threads.contains_key(&current) {
                self.current_thread = None;
            }
        }
        changed.sort_unstable();
        changed
    }

    pub fn current_thread(&self) -> Option<ThreadId> {
        self.current_thread
    }

    /// Select a thread. Returns `true` if the selection changed.
    pub fn set_current_thread(&mut self, id: Option<ThreadId>) -> bool {
        if self.current_thread == id {
            return false;
        }
        self.current_thread = id;
        true
    }

    // -- thread groups ------------------------------------------------------

    pub fn group(&self, id: &str) -> Option<&ThreadGroup> {
        self.groups.get(id)
    }

    /// Thread groups ordered by id.
    pub fn groups(&self) -> impl Iterator<Item = &ThreadGroup> {
        self.groups.values()
    }

    pub fn group_mut(&mut self, id: &str) -> &mut ThreadGroup {
        self.groups
            .entry(id.to_string())
            .or_insert_with(|| ThreadGroup {
                id: id.to_string(),
                ..ThreadGroup::default()
            })
    }

    pub fn remove_group(&mut self, id: &str) -> bool {
        self.groups.remove(id).is_some()
    }

    // -- frames -------------------------------------------------------------

    /// The current stack. Empty unless the session is stopped.
    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    /// Store a freshly listed stack. Ignored unless stopped.
    pub fn set_frames(&mut self, frames: Vec<StackFrame>) -> bool {
        if self.status != SessionStatus::Stopped {
            tracing::debug!("discarding stack listing while {}", self.status);
            return false;
        }
        self.frames = frames;
        true
    }

    /// Drop the current stack. Returns `true` if there was one.
    pub fn invalidate_frames(&mut self) -> bool {
        !std::mem::take(&mut self.frames).is_empty()
    }

    pub fn current_frame(&self) -> u32 {
        self.current_frame
    }

    /// Select a frame level. Returns `true` if the selection changed.
    pub fn set_current_frame(&mut self, level: u32) -> bool {
        if self.current_frame == level {
            return false;
        }
        self.current_frame = level;
        true
    }

    /// Drop threads, groups and frames at session end. Status is kept.
    pub fn clear(&mut self) {
        self.threads.clear();
        self.groups.clear();
        self.frames.clear();
        self.current_thread = None;
        self.current_frame = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mifront_mi::Parser;

    fn results(line: &str) -> Results {
        match Parser::new().parse_line(line).unwrap().unwrap() {
            mifront_mi::Record::Result(r) => r.results,
            mifront_mi::Record::Async(a) => a.results,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn status_legal_edges() {
        use SessionStatus::*;
        assert!(NotStarted.can_transition(Running));
        assert!(Running.can_transition(Stopped));
        assert!(Stopped.can_transition(Running));
        assert!(Running.can_transition(Exited));
        assert!(Stopped.can_transition(TerminatedAbnormally));
        assert!(NotStarted.can_transition(Exited));
        assert!(NotStarted.can_transition(Stopped));
        assert!(!Running.can_transition(NotStarted));
        assert!(!Stopped.can_transition(NotStarted));
        assert!(!Exited.can_transition(Running));
        assert!(!TerminatedAbnormally.can_transition(Exited));
    }

    #[test]
    fn state_transition_happy_path() {
        let mut state = SessionState::new();
        assert_eq!(state.status(), SessionStatus::NotStarted);
        assert_eq!(state.run_epoch(), 0);

        assert!(state.transition(SessionStatus::Running).unwrap());
        assert_eq!(state.run_epoch(), 1);
        assert!(state.transition(SessionStatus::Stopped).unwrap());
        assert!(state.transition(SessionStatus::Running).unwrap());
        assert_eq!(state.run_epoch(), 2);
        assert!(state.transition(SessionStatus::Exited).unwrap());
        assert!(state.status().is_terminal());
    }

    #[test]
    fn state_self_loop_is_noop() {
        let mut state = SessionState::new();
        state.transition(SessionStatus::Running).unwrap();
        assert!(!state.transition(SessionStatus::Running).unwrap());
        assert_eq!(state.run_epoch(), 1);
    }

    #[test]
    fn state_illegal_edge_rejected() {
        let mut state = SessionState::new();
        state.transition(SessionStatus::Running).unwrap();
        let err = state.transition(SessionStatus::NotStarted).unwrap_err();
        assert_eq!(
            err,
            EngineError::IllegalTransition {
                from: SessionStatus::Running,
                to: SessionStatus::NotStarted,
            }
        );
        assert_eq!(state.status(), SessionStatus::Running);
    }

    #[test]
    fn attach_stops_without_running() {
        let mut state = SessionState::new();
        assert!(state.transition(SessionStatus::Stopped).unwrap());
        assert_eq!(state.run_epoch(), 0);
        assert!(state.transition(SessionStatus::Running).unwrap());
    }

    #[test]
    fn groups_listed_in_id_order() {
        let mut state = SessionState::new();
        state.group_mut("i2").pid = Some(20);
        state.group_mut("i1").exit_code = Some(3);
        let ids: Vec<_> = state.groups().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, vec!["i1", "i2"]);
        assert_eq!(state.group("i1").unwrap().exit_code, Some(3));
    }

    #[test]
    fn state_terminal_ignores_events() {
        let mut state = SessionState::new();
        state.transition(SessionStatus::TerminatedAbnormally).unwrap();
        assert!(!state.transition(SessionStatus::Running).unwrap());
        assert!(!state.transition(SessionStatus::Exited).unwrap());
        assert_eq!(state.status(), SessionStatus::TerminatedAbnormally);
    }

    #[test]
    fn stop_identity_dedup() {
        let mut state = SessionState::new();
        state.transition(SessionStatus::Running).unwrap();
        let stop = StopIdentity {
            epoch: state.run_epoch(),
            breakpoint: Some(1),
            thread: Some(1),
        };
        assert!(state.register_stop(stop));
        assert!(!state.register_stop(stop));

        state.transition(SessionStatus::Stopped).unwrap();
        state.transition(SessionStatus::Running).unwrap();
        let next = StopIdentity {
            epoch: state.run_epoch(),
            ..stop
        };
        assert!(state.register_stop(next));
    }

    #[test]
    fn frames_only_kept_while_stopped() {
        let mut state = SessionState::new();
        let r = results(r#"^done,stack=[frame={level="0",func="main",file="t.c",line="3"}]"#);
        let frames = StackFrame::list_from_mi(&r);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].line, Some(3));

        assert!(!state.set_frames(frames.clone()));
        assert!(state.frames().is_empty());

        state.transition(SessionStatus::Running).unwrap();
        state.transition(SessionStatus::Stopped).unwrap();
        assert!(state.set_frames(frames));
        assert_eq!(state.frames()[0].function.as_deref(), Some("main"));
        assert!(state.invalidate_frames());
        assert!(!state.invalidate_frames());
    }

    #[test]
    fn thread_states_updated_selectively() {
        let mut state = SessionState::new();
        state.add_thread(Thread::new(1, Some("i1".into())));
        state.add_thread(Thread::new(2, Some("i1".into())));
        assert!(!state.add_thread(Thread::new(2, None)));

        let changed = state.set_thread_states(
            Some(&[2][..]),
            ThreadState::Stopped,
            Some("signal-received"),
        );
        assert_eq!(changed, vec![2]);
        assert_eq!(state.thread(1).unwrap().state, ThreadState::Running);
        assert_eq!(
            state.thread(2).unwrap().stop_reason.as_deref(),
            Some("signal-received")
        );

        let changed = state.set_thread_states(None, ThreadState::Running, None);
        assert_eq!(changed, vec![2]);
    }

    #[test]
    fn replace_threads_reports_differences() {
        let mut state = SessionState::new();
        state.add_thread(Thread::new(1, Some("i1".into())));
        state.add_thread(Thread::new(3, Some("i1".into())));
        state.set_current_thread(Some(3));

        let r = results(
            r#"^done,threads=[{id="1",target-id="process 42",state="stopped"},{id="2",target-id="Thread 2",state="running"}],current-thread-id="1""#,
        );
        let listed: Vec<Thread> = r
            .get("threads")
            .unwrap()
            .items()
            .into_iter()
            .filter_map(Thread::from_mi)
            .collect();
        let changed = state.replace_threads(listed);
        assert_eq!(changed, vec![1, 2, 3]);
        assert_eq!(state.thread(1).unwrap().group_id.as_deref(), Some("i1"));
        assert!(state.thread(3).is_none());
        assert_eq!(state.current_thread(), None);
    }

    #[test]
    fn remove_current_thread_clears_selection() {
        let mut state = SessionState::new();
        state.add_thread(Thread::new(1, None));
        assert!(state.set_current_thread(Some(1)));
        assert!(!state.set_current_thread(Some(1)));
        assert!(state.remove_thread(1));
        assert_eq!(state.current_thread(), None);
        assert!(!state.remove_thread(1));
    }

    #[test]
    fn locals_from_listing() {
        let r = results(
            r#"^done,variables=[{name="argc",arg="1",type="int",value="1"},{name="p",type="struct point"}]"#,
        );
        let locals = Local::list_from_mi(&r);
        assert_eq!(locals.len(), 2);
        assert!(locals[0].is_argument);
        assert_eq!(locals[0].value.as_deref(), Some("1"));
        assert_eq!(locals[1].type_name.as_deref(), Some("struct point"));
        assert_eq!(locals[1].value, None);
        assert!(Local::list_from_mi(&results("^done")).is_empty());
    }

    #[test]
    fn status_display_names() {
        assert_eq!(SessionStatus::NotStarted.to_string(), "not started");
        assert_eq!(
            SessionStatus::TerminatedAbnormally.to_string(),
            "terminated abnormally"
        );
    }
}
