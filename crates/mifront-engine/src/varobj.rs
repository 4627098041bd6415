//! Variable object tracking.
//!
//! Every tracked expression is a handle the debugger knows by name. Roots
//! are named `var1`, `var2`, ... by the tracker; children carry the names
//! the debugger derives from their parent (`var1.next`, `var1.0`). Children
//! are fetched lazily and cached until the parent's type changes.

use std::collections::HashMap;

use mifront_mi::{quote, Results, Value};
use serde::Serialize;

use crate::error::EngineError;
use crate::state::ThreadId;

/// Frame a root variable object is evaluated in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VarFrame {
    /// The selected frame at creation time.
    #[default]
    Current,
    /// Re-evaluated in whatever frame is selected on each update.
    Floating,
    /// A specific thread and frame level.
    Explicit { thread: ThreadId, level: u32 },
}

/// A tracked expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariableObject {
    pub handle: String,
    pub expression: String,
    pub type_name: Option<String>,
    pub value: Option<String>,
    /// Set when the last refresh changed the value.
    pub dirty: bool,
    pub in_scope: bool,
    pub expandable: bool,
    pub num_children: u32,
    pub parent: Option<String>,
    /// Child handles, `None` until expanded.
    pub children: Option<Vec<String>>,
}

impl VariableObject {
    /// Build from a `-var-create` result or a `child={...}` tuple.
    fn from_mi(results: &Results, expression: &str, parent: Option<&str>) -> Option<Self> {
        let handle = results.get_str("name")?.to_string();
        let num_children = results.get_parsed("numchild").unwrap_or(0);
        let dynamic_more = results.get_str("dynamic") == Some("1")
            && results.get_str("has_more") == Some("1");
        Some(Self {
            handle,
            expression: results
                .get_str("exp")
                .unwrap_or(expression)
                .to_string(),
            type_name: results.get_str("type").map(str::to_string),
            value: results.get_str("value").map(str::to_string),
            dirty: false,
            in_scope: true,
            expandable: num_children > 0 || dynamic_more,
            num_children,
            parent: parent.map(str::to_string),
            children: None,
        })
    }
}

/// One entry of a refresh, for publishing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarChange {
    pub handle: String,
    /// New value, or `None` when the handle became invalid.
    pub value: Option<String>,
}

/// Outcome of one `-var-update`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VarUpdate {
    pub changes: Vec<VarChange>,
    /// Objects that went out of existence and still live in the debugger.
    pub invalidated: Vec<String>,
}

// ---------------------------------------------------------------------------
// Command text
// ---------------------------------------------------------------------------

/// `-var-create` for a root object.
pub fn create_command(handle: &str, expression: &str, frame: VarFrame) -> String {
    match frame {
        VarFrame::Current => format!("-var-create {handle} * {}", quote(expression)),
        VarFrame::Floating => format!("-var-create {handle} @ {}", quote(expression)),
        VarFrame::Explicit { thread, level } => format!(
            "-var-create --thread {thread} --frame {level} {handle} * {}",
            quote(expression)
        ),
    }
}

pub fn list_children_command(handle: &str) -> String {
    format!("-var-list-children --all-values {handle}")
}

pub fn update_command() -> &'static str {
    "-var-update --all-values *"
}

pub fn delete_command(handle: &str) -> String {
    format!("-var-delete {handle}")
}

pub fn assign_command(handle: &str, value: &str) -> String {
    format!("-var-assign {handle} {}", quote(value))
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// All live variable objects of one session.
#[derive(Debug, Default)]
pub struct VariableObjectTracker {
    objects: HashMap<String, VariableObject>,
    roots: Vec<String>,
    next_id: u64,
}

impl VariableObjectTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a fresh root handle name.
    pub fn next_handle(&mut self) -> String {
        self.next_id += 1;
        format!("var{}", self.next_id)
    }

    pub fn get(&self, handle: &str) -> Option<&VariableObject> {
        self.objects.get(handle)
    }

    /// Like [`get`](Self::get) but fails with `InvalidHandle`.
    pub fn require(&self, handle: &str) -> Result<&VariableObject, EngineError> {
        self.objects
            .get(handle)
            .ok_or_else(|| EngineError::InvalidHandle(handle.to_string()))
    }

    pub fn contains(&self, handle: &str) -> bool {
        self.objects.contains_key(handle)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Root handles in creation order.
    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    /// Register a root from a successful `-var-create` result.
    pub fn insert_root(
        &mut self,
        results: &Results,
        expression: &str,
    ) -> Result<&VariableObject, EngineError> {
        let obj = VariableObject::from_mi(results, expression, None).ok_or_else(|| {
            EngineError::MalformedResponse("variable object without a name".into())
        })?;
        let handle = obj.handle.clone();
        tracing::debug!("created variable object {} for {}", handle, expression);
        self.roots.push(handle.clone());
        self.objects.insert(handle.clone(), obj);
        Ok(&self.objects[&handle])
    }

    /// Cached children of `handle`, if it has been expanded.
    pub fn cached_children(&self, handle: &str) -> Result<Option<Vec<VariableObject>>, EngineError> {
        let obj = self.require(handle)?;
        Ok(obj.children.as_ref().map(|names| {
            names
                .iter()
                .filter_map(|name| self.objects.get(name).cloned())
                .collect()
        }))
    }

    /// Store the result of `-var-list-children` for `parent`.
    pub fn set_children(
        &mut self,
        parent: &str,
        results: &Results,
    ) -> Result<Vec<VariableObject>, EngineError> {
        self.require(parent)?;
        self.drop_descendants(parent);

        let children: Vec<VariableObject> = results
            .get("children")
            .map(|list| {
                list.items()
                    .into_iter()
                    .filter_map(Value::as_results)
                    .filter_map(|child| VariableObject::from_mi(child, "", Some(parent)))
                    .collect()
            })
            .unwrap_or_default();

        let names: Vec<String> = children.iter().map(|c| c.handle.clone()).collect();
        for child in &children {
            self.objects.insert(child.handle.clone(), child.clone());
        }
        if let Some(obj) = self.objects.get_mut(parent) {
            obj.children = Some(names);
            obj.expandable = !children.is_empty() || obj.expandable;
        }
        Ok(children)
    }

    /// Remove `handle` and all of its descendants.
    ///
    /// Returns every removed handle, `handle` first.
    pub fn dispose(&mut self, handle: &str) -> Result<Vec<String>, EngineError> {
        let obj = self
            .objects
            .remove(handle)
            .ok_or_else(|| EngineError::InvalidHandle(handle.to_string()))?;

        let mut removed = vec![handle.to_string()];
        removed.extend(self.remove_subtree(obj.children.unwrap_or_default()));

        self.roots.retain(|r| r != handle);
        if let Some(parent) = obj.parent.as_deref().and_then(|p| self.objects.get_mut(p)) {
            parent.children = None;
        }
        tracing::debug!("disposed {} variable object(s) under {}", removed.len(), handle);
        Ok(removed)
    }

    fn drop_descendants(&mut self, handle: &str) -> Vec<String> {
        let children = self
            .objects
            .get_mut(handle)
            .and_then(|obj| obj.children.take())
            .unwrap_or_default();
        self.remove_subtree(children)
    }

    fn remove_subtree(&mut self, mut stack: Vec<String>) -> Vec<String> {
        let mut removed = Vec::new();
        while let Some(name) = stack.pop() {
            if let Some(obj) = self.objects.remove(&name) {
                stack.extend(obj.children.unwrap_or_default());
                removed.push(name);
            }
        }
        removed
    }

    /// Apply the `changelist` of `-var-update`.
    ///
    /// All dirty flags are cleared first; objects whose value changed are
    /// then flagged. Objects reported `invalid` are removed together with
    /// their descendants and listed in [`VarUpdate::invalidated`] so the
    /// engine can delete them in the debugger. Cached children are dropped
    /// when the type or the child count changes.
    pub fn apply_update(&mut self, results: &Results) -> VarUpdate {
        for obj in self.objects.values_mut() {
            obj.dirty = false;
        }

        let mut update = VarUpdate::default();
        let Some(list) = results.get("changelist") else {
            return update;
        };

        for entry in list.items() {
            let Some(name) = entry.get_str("name") else {
                continue;
            };
            if !self.objects.contains_key(name) {
                tracing::trace!("update for untracked variable object {}", name);
                continue;
            }

            if entry.get_str("in_scope") == Some("invalid") {
                if let Ok(removed) = self.dispose(name) {
                    update.changes.extend(removed.into_iter().map(|handle| VarChange {
                        handle,
                        value: None,
                    }));
                    update.invalidated.push(name.to_string());
                }
                continue;
            }

            let type_changed = entry.get_str("type_changed") == Some("true");
            let num_children = entry.get_parsed::<u32>("new_num_children");
            if type_changed || num_children.is_some() {
                let stale = self.drop_descendants(name);
                update.changes.extend(stale.into_iter().map(|handle| VarChange {
                    handle,
                    value: None,
                }));
            }

            let Some(obj) = self.objects.get_mut(name) else {
                continue;
            };
            obj.in_scope = entry.get_str("in_scope") != Some("false");
            if type_changed {
                if let Some(new_type) = entry.get_str("new_type") {
                    obj.type_name = Some(new_type.to_string());
                }
            }
            if let Some(n) = num_children {
                obj.num_children = n;
                obj.expandable = n > 0;
            }
            if let Some(value) = entry.get_str("value") {
                obj.value = Some(value.to_string());
            }
            obj.dirty = true;
            update.changes.push(VarChange {
                handle: obj.handle.clone(),
                value: obj.value.clone(),
            });
        }
        update
    }

    /// Record a value written with `-var-assign`.
    pub fn set_value(&mut self, handle: &str, value: &str) -> Result<(), EngineError> {
        let obj = self
            .objects
            .get_mut(handle)
            .ok_or_else(|| EngineError::InvalidHandle(handle.to_string()))?;
        obj.value = Some(value.to_string());
        obj.dirty = true;
        Ok(())
    }

    /// Drop everything (session teardown).
    pub fn clear(&mut self) {
        self.objects.clear();
        self.roots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mifront_mi::{Parser, Record};

    fn results(line: &str) -> Results {
        match Parser::new().parse_line(line).unwrap().unwrap() {
            Record::Result(r) => r.results,
            other => panic!("unexpected {other:?}"),
        }
    }

    fn tracker_with_struct() -> VariableObjectTracker {
        let mut t = VariableObjectTracker::new();
        let name = t.next_handle();
        assert_eq!(name, "var1");
        t.insert_root(
            &results(r#"^done,name="var1",numchild="2",value="{...}",type="struct point",thread-id="1",has_more="0""#),
            "p",
        )
        .unwrap();
        t.set_children(
            "var1",
            &results(
                r#"^done,numchild="2",children=[child={name="var1.x",exp="x",numchild="0",value="1",type="int"},child={name="var1.y",exp="y",numchild="0",value="2",type="int"}],has_more="0""#,
            ),
        )
        .unwrap();
        t
    }

    #[test]
    fn command_text() {
        assert_eq!(create_command("var1", "x", VarFrame::Current), r#"-var-create var1 * "x""#);
        assert_eq!(create_command("var2", "g", VarFrame::Floating), r#"-var-create var2 @ "g""#);
        assert_eq!(
            create_command("var3", "a[i]", VarFrame::Explicit { thread: 2, level: 1 }),
            r#"-var-create --thread 2 --frame 1 var3 * "a[i]""#
        );
        assert_eq!(list_children_command("var1"), "-var-list-children --all-values var1");
        assert_eq!(update_command(), "-var-update --all-values *");
        assert_eq!(delete_command("var1"), "-var-delete var1");
        assert_eq!(assign_command("var1", "42"), r#"-var-assign var1 "42""#);
    }

    #[test]
    fn handles_are_unique() {
        let mut t = VariableObjectTracker::new();
        assert_eq!(t.next_handle(), "var1");
        assert_eq!(t.next_handle(), "var2");
    }

    #[test]
    fn insert_root_reads_fields() {
        let mut t = VariableObjectTracker::new();
        let obj = t
            .insert_root(&results(r#"^done,name="var1",numchild="0",value="42",type="int""#), "x")
            .unwrap();
        assert_eq!(obj.expression, "x");
        assert_eq!(obj.value.as_deref(), Some("42"));
        assert_eq!(obj.type_name.as_deref(), Some("int"));
        assert!(!obj.expandable);
        assert_eq!(t.roots(), ["var1".to_string()]);
    }

    #[test]
    fn insert_root_without_name_is_malformed() {
        let mut t = VariableObjectTracker::new();
        let err = t.insert_root(&results("^done"), "x").unwrap_err();
        assert!(matches!(err, EngineError::MalformedResponse(_)));
    }

    #[test]
    fn children_cached_after_expand() {
        let t = tracker_with_struct();
        let children = t.cached_children("var1").unwrap().unwrap();
        let names: Vec<_> = children.iter().map(|c| c.expression.as_str()).collect();
        assert_eq!(names, vec!["x", "y"]);
        assert_eq!(children[0].parent.as_deref(), Some("var1"));
        assert_eq!(t.cached_children("var1.x").unwrap(), None);
    }

    #[test]
    fn dispose_invalidates_descendants() {
        let mut t = tracker_with_struct();
        let removed = t.dispose("var1").unwrap();
        assert_eq!(removed.len(), 3);
        assert_eq!(removed[0], "var1");
        assert!(t.is_empty());
        assert!(t.roots().is_empty());
        assert_eq!(
            t.cached_children("var1").unwrap_err(),
            EngineError::InvalidHandle("var1".into())
        );
        assert!(matches!(t.dispose("var1.x"), Err(EngineError::InvalidHandle(_))));
    }

    #[test]
    fn dispose_child_drops_parent_cache() {
        let mut t = tracker_with_struct();
        t.dispose("var1.x").unwrap();
        assert_eq!(t.cached_children("var1").unwrap(), None);
        assert!(t.get("var1.y").is_some());
    }

    #[test]
    fn update_marks_dirty_and_clears_on_next_refresh() {
        let mut t = tracker_with_struct();
        let update = t.apply_update(&results(
            r#"^done,changelist=[{name="var1.x",value="5",in_scope="true",type_changed="false",has_more="0"}]"#,
        ));
        assert!(update.invalidated.is_empty());
        assert_eq!(
            update.changes,
            vec![VarChange {
                handle: "var1.x".into(),
                value: Some("5".into())
            }]
        );
        assert!(t.get("var1.x").unwrap().dirty);
        assert!(!t.get("var1.y").unwrap().dirty);

        let update = t.apply_update(&results("^done,changelist=[]"));
        assert_eq!(update, VarUpdate::default());
        assert!(!t.get("var1.x").unwrap().dirty);
    }

    #[test]
    fn update_out_of_scope_and_invalid() {
        let mut t = tracker_with_struct();
        let update = t.apply_update(&results(
            r#"^done,changelist=[{name="var1",in_scope="false",type_changed="false"}]"#,
        ));
        assert_eq!(update.changes.len(), 1);
        assert!(!t.get("var1").unwrap().in_scope);

        let update = t.apply_update(&results(
            r#"^done,changelist=[{name="var1",in_scope="invalid",type_changed="false"}]"#,
        ));
        assert_eq!(update.changes.len(), 3);
        assert!(update.changes.iter().all(|c| c.value.is_none()));
        assert_eq!(update.invalidated, vec!["var1".to_string()]);
        assert!(t.is_empty());
    }

    #[test]
    fn update_type_changed_drops_children() {
        let mut t = tracker_with_struct();
        let update = t.apply_update(&results(
            r#"^done,changelist=[{name="var1",value="0x0",in_scope="true",type_changed="true",new_type="char *",new_num_children="1"}]"#,
        ));
        let obj = t.get("var1").unwrap();
        assert_eq!(obj.type_name.as_deref(), Some("char *"));
        assert_eq!(obj.num_children, 1);
        assert!(obj.children.is_none());
        assert!(t.get("var1.x").is_none());
        let gone: Vec<_> = update
            .changes
            .iter()
            .filter(|c| c.value.is_none())
            .map(|c| c.handle.as_str())
            .collect();
        assert_eq!(gone.len(), 2);
    }

    #[test]
    fn child_count_change_drops_cached_children() {
        let mut t = tracker_with_struct();
        assert_eq!(t.len(), 3);
        let update = t.apply_update(&results(
            r#"^done,changelist=[{name="var1",value="{...}",in_scope="true",type_changed="false",new_num_children="0",has_more="0"}]"#,
        ));
        assert_eq!(t.len(), 1);
        assert!(!t.contains("var1.x"));
        assert_eq!(
            t.cached_children("var1.x").unwrap_err(),
            EngineError::InvalidHandle("var1.x".into())
        );
        assert!(!t.get("var1").unwrap().expandable);
        assert!(update.changes.contains(&VarChange {
            handle: "var1.y".into(),
            value: None
        }));
        assert_eq!(
            update.changes.last(),
            Some(&VarChange {
                handle: "var1".into(),
                value: Some("{...}".into())
            })
        );
    }

    #[test]
    fn set_value_requires_live_handle() {
        let mut t = tracker_with_struct();
        t.set_value("var1.y", "9").unwrap();
        assert_eq!(t.get("var1.y").unwrap().value.as_deref(), Some("9"));
        t.clear();
        assert!(matches!(t.set_value("var1.y", "1"), Err(EngineError::InvalidHandle(_))));
    }
}
