//! Persistent call frames
//!
//! Every mutation returns a new frame sharing tails with the prior one, so a
//! choice continuation is a cheap snapshot. Visit history, turn count, choice
//! count, globals, the evaluation stack, and the RNG flow *through* frames —
//! they are story-global and survive pushes and pops. Locals and the return
//! continuation are frame-private.

use std::rc::Rc;

use crate::address::Address;
use crate::error::{Error, Result};
use crate::list::ListDefs;
use crate::rng::StoryRng;
use crate::stepper::Stepper;
use crate::tree::{Element, VisitAddr};
use crate::value::Value;

/// One recorded container entry.
#[derive(Debug)]
struct VisitNode {
    addr: Address,
    entry_turn: u32,
    prev: Option<Rc<VisitNode>>,
}

/// Persistent visit history, newest first.
#[derive(Debug, Clone, Default)]
pub struct Visits(Option<Rc<VisitNode>>);

impl Visits {
    /// Record an entry. Re-entering the address already on top is a no-op.
    fn push(&self, addr: Address, entry_turn: u32) -> Visits {
        if let Some(top) = &self.0 {
            if top.addr == addr {
                return self.clone();
            }
        }
        Visits(Some(Rc::new(VisitNode {
            addr,
            entry_turn,
            prev: self.0.clone(),
        })))
    }

    /// Number of maximal contiguous runs of entries contained by `addr`.
    fn count(&self, addr: &Address) -> u32 {
        let mut count = 0;
        let mut inside = false;
        let mut cur = self.0.as_deref();
        while let Some(v) = cur {
            if !addr.contains(&v.addr) {
                inside = false;
            } else if !inside {
                count += 1;
                inside = true;
            }
            cur = v.prev.as_deref();
        }
        count
    }

    /// Turn of the newest entry contained by `addr`.
    fn last_turn(&self, addr: &Address) -> Option<u32> {
        let mut cur = self.0.as_deref();
        while let Some(v) = cur {
            if addr.contains(&v.addr) {
                return Some(v.entry_turn);
            }
            cur = v.prev.as_deref();
        }
        None
    }
}

#[derive(Debug)]
struct VarNode {
    name: String,
    value: Value,
    prev: Option<Rc<VarNode>>,
}

/// Persistent association list of variable bindings, most recent first.
#[derive(Debug, Clone, Default)]
pub struct Vars(Option<Rc<VarNode>>);

impl Vars {
    fn with(&self, name: String, value: Value) -> Vars {
        Vars(Some(Rc::new(VarNode {
            name,
            value,
            prev: self.0.clone(),
        })))
    }

    fn get(&self, name: &str) -> Option<&Value> {
        let mut cur = self.0.as_deref();
        while let Some(v) = cur {
            if v.name == name {
                return Some(&v.value);
            }
            cur = v.prev.as_deref();
        }
        None
    }

    /// Replace an existing binding, rebuilding the prefix above it.
    fn update(&self, name: &str, value: Value) -> Option<Vars> {
        let mut prefix: Vec<(String, Value)> = Vec::new();
        let mut cur = self.0.clone();
        loop {
            let node = cur?;
            if node.name == name {
                let mut rebuilt = Vars(Some(Rc::new(VarNode {
                    name: name.to_string(),
                    value,
                    prev: node.prev.clone(),
                })));
                for n in prefix.into_iter().rev() {
                    rebuilt = rebuilt.with(n.0, n.1);
                }
                return Some(rebuilt);
            }
            prefix.push((node.name.clone(), node.value.clone()));
            cur = node.prev.clone();
        }
    }
}

#[derive(Debug)]
struct EvalNode {
    value: Value,
    prev: Option<Rc<EvalNode>>,
}

/// Persistent evaluation stack.
#[derive(Debug, Clone, Default)]
pub struct EvalStack(Option<Rc<EvalNode>>);

impl EvalStack {
    fn push(&self, value: Value) -> EvalStack {
        EvalStack(Some(Rc::new(EvalNode {
            value,
            prev: self.0.clone(),
        })))
    }

    fn pop(&self) -> Option<(Value, EvalStack)> {
        self.0
            .as_ref()
            .map(|n| (n.value.clone(), EvalStack(n.prev.clone())))
    }

    pub fn depth(&self) -> usize {
        let mut n = 0;
        let mut cur = self.0.as_deref();
        while let Some(v) = cur {
            n += 1;
            cur = v.prev.as_deref();
        }
        n
    }
}

/// A call frame.
///
/// Cloning is cheap: all heavyweight state is behind `Rc`.
#[derive(Debug, Clone)]
pub struct CallFrame {
    visits: Visits,
    turn_count: u32,
    choice_count: u32,
    globals: Vars,
    eval_stack: EvalStack,
    list_defs: Rc<ListDefs>,
    rng: StoryRng,

    locals: Vars,
    call_depth: u32,
    is_function: bool,
    prev: Option<Rc<CallFrame>>,
    return_to: Option<Element>,
    return_visits: Vec<VisitAddr>,
    return_stepper: Option<Stepper>,
}

impl CallFrame {
    /// The root frame of a story.
    pub fn root(list_defs: Rc<ListDefs>, seed: u64) -> CallFrame {
        CallFrame {
            visits: Visits::default(),
            turn_count: 0,
            choice_count: 0,
            globals: Vars::default(),
            eval_stack: EvalStack::default(),
            list_defs,
            rng: StoryRng::new(seed),
            locals: Vars::default(),
            call_depth: 0,
            is_function: false,
            prev: None,
            return_to: None,
            return_visits: Vec::new(),
            return_stepper: None,
        }
    }

    pub fn turn_count(&self) -> u32 {
        self.turn_count
    }

    pub fn choice_count(&self) -> u32 {
        self.choice_count
    }

    pub fn is_function(&self) -> bool {
        self.is_function
    }

    pub fn has_parent(&self) -> bool {
        self.prev.is_some()
    }

    pub fn list_defs(&self) -> &ListDefs {
        &self.list_defs
    }

    pub fn eval_depth(&self) -> usize {
        self.eval_stack.depth()
    }

    pub fn rng(&self) -> &StoryRng {
        &self.rng
    }

    // --- visit accounting ---

    /// Record the container entries crossed by the last navigation.
    ///
    /// Only containers flagged to record visits count, and start-only
    /// containers count only when entered through their first element.
    pub fn visit_all(&self, visits: &[VisitAddr]) -> CallFrame {
        let mut f = self.clone();
        for v in visits {
            if !v.flags.records_visits() {
                continue;
            }
            if v.flags.count_start_only() && v.entry_index != 0 {
                continue;
            }
            f.visits = f.visits.push(v.addr.clone(), f.turn_count);
        }
        f
    }

    pub fn visit_count(&self, addr: &Address) -> u32 {
        self.visits.count(addr)
    }

    /// Turns since `addr` was last entered, or -1 if never.
    pub fn turns_since(&self, addr: &Address) -> i64 {
        match self.visits.last_turn(addr) {
            Some(turn) => self.turn_count as i64 - turn as i64,
            None => -1,
        }
    }

    // --- evaluation stack ---

    /// Push a value; lists are normalized against the definitions first.
    pub fn push_val(&self, value: Value) -> CallFrame {
        let value = match value {
            Value::List(l) => Value::List(l.resolve(&self.list_defs)),
            v => v,
        };
        let mut f = self.clone();
        f.eval_stack = f.eval_stack.push(value);
        f
    }

    pub fn pop_val(&self) -> Result<(Value, CallFrame)> {
        let (value, stack) = self.eval_stack.pop().ok_or(Error::StackUnderflow)?;
        let mut f = self.clone();
        f.eval_stack = stack;
        Ok((value, f))
    }

    // --- counters ---

    pub fn inc_turn(&self) -> CallFrame {
        let mut f = self.clone();
        f.turn_count += 1;
        f
    }

    pub fn inc_choice(&self) -> CallFrame {
        let mut f = self.clone();
        f.choice_count += 1;
        f
    }

    pub fn reset_choice_count(&self) -> CallFrame {
        let mut f = self.clone();
        f.choice_count = 0;
        f
    }

    pub fn with_rng(&self, rng: StoryRng) -> CallFrame {
        let mut f = self.clone();
        f.rng = rng;
        f
    }

    // --- variables ---

    /// Bind a local in this frame, shadowing any earlier binding.
    pub fn declare_local(&self, name: &str, value: Value) -> CallFrame {
        let mut f = self.clone();
        f.locals = f.locals.with(name.to_string(), value);
        f
    }

    /// Re-bind an existing local, declaring it if absent.
    pub fn update_local(&self, name: &str, value: Value) -> CallFrame {
        let mut f = self.clone();
        f.locals = match f.locals.update(name, value.clone()) {
            Some(locals) => locals,
            None => f.locals.with(name.to_string(), value),
        };
        f
    }

    /// Bind a global.
    pub fn set_global(&self, name: &str, value: Value) -> CallFrame {
        let mut f = self.clone();
        f.globals = f.globals.with(name.to_string(), value);
        f
    }

    /// Re-assign a variable wherever it is bound.
    ///
    /// A binding holding a variable reference redirects the write to the
    /// referenced scope. Unknown names become globals.
    pub fn update_var(&self, name: &str, value: Value) -> Result<CallFrame> {
        if let Some(Value::VarRef {
            name: target,
            content_index,
        }) = self.lookup_raw(name).cloned()
        {
            return self.update_at(content_index, &target, value);
        }
        let mut f = self.clone();
        if let Some(locals) = f.locals.update(name, value.clone()) {
            f.locals = locals;
            return Ok(f);
        }
        if let Some(globals) = f.globals.update(name, value.clone()) {
            f.globals = globals;
            return Ok(f);
        }
        f.globals = f.globals.with(name.to_string(), value);
        Ok(f)
    }

    /// Write through a variable reference: content index 0 targets globals,
    /// `n` targets the locals of the frame at call depth `n - 1`.
    fn update_at(&self, content_index: u32, name: &str, value: Value) -> Result<CallFrame> {
        if content_index == 0 {
            let mut f = self.clone();
            f.globals = match f.globals.update(name, value.clone()) {
                Some(globals) => globals,
                None => f.globals.with(name.to_string(), value),
            };
            return Ok(f);
        }
        let depth = content_index - 1;
        if self.call_depth == depth {
            return Ok(self.update_local(name, value));
        }
        let parent = self
            .prev
            .as_ref()
            .ok_or_else(|| Error::VariableNotFound(name.to_string()))?;
        let updated = parent.update_at(content_index, name, value)?;
        let mut f = self.clone();
        f.prev = Some(Rc::new(updated));
        Ok(f)
    }

    /// Read a variable, dereferencing variable references transitively.
    pub fn get_var(&self, name: &str) -> Option<Value> {
        let v = self.lookup_raw(name)?.clone();
        self.deref(v)
    }

    fn deref(&self, value: Value) -> Option<Value> {
        match value {
            Value::VarRef {
                name,
                content_index,
            } => {
                let v = self.lookup_at(content_index, &name)?;
                self.deref(v)
            }
            v => Some(v),
        }
    }

    fn lookup_raw(&self, name: &str) -> Option<&Value> {
        self.locals.get(name).or_else(|| self.globals.get(name))
    }

    fn lookup_at(&self, content_index: u32, name: &str) -> Option<Value> {
        if content_index == 0 {
            return self.globals.get(name).cloned();
        }
        let depth = content_index - 1;
        let mut frame = self;
        loop {
            if frame.call_depth == depth {
                return frame.locals.get(name).cloned();
            }
            frame = frame.prev.as_deref()?;
        }
    }

    /// Content index a fresh reference to `name` should carry: the local
    /// frame's depth + 1 when locally bound, else 0 (global).
    pub fn binding_index(&self, name: &str) -> u32 {
        if self.locals.get(name).is_some() {
            self.call_depth + 1
        } else {
            0
        }
    }

    // --- call stack ---

    /// Push a frame for a function, tunnel, or thread call.
    pub fn push_frame(
        &self,
        return_to: Option<Element>,
        return_visits: Vec<VisitAddr>,
        return_stepper: Option<Stepper>,
        is_function: bool,
    ) -> CallFrame {
        CallFrame {
            visits: self.visits.clone(),
            turn_count: self.turn_count,
            choice_count: self.choice_count,
            globals: self.globals.clone(),
            eval_stack: self.eval_stack.clone(),
            list_defs: self.list_defs.clone(),
            rng: self.rng.clone(),
            locals: Vars::default(),
            call_depth: self.call_depth + 1,
            is_function,
            prev: Some(Rc::new(self.clone())),
            return_to,
            return_visits,
            return_stepper,
        }
    }

    /// The return continuation retained by this frame, for threads.
    pub fn retained_return(&self) -> (Option<Element>, Vec<VisitAddr>, Option<Stepper>) {
        (
            self.return_to,
            self.return_visits.clone(),
            self.return_stepper.clone(),
        )
    }

    /// Pop this frame, promoting the story-global fields into the parent's
    /// shape. Returns the popped frame's return continuation and whether it
    /// was a function frame.
    #[allow(clippy::type_complexity)]
    pub fn pop_frame(
        &self,
    ) -> Option<(CallFrame, Option<Element>, Vec<VisitAddr>, Option<Stepper>, bool)> {
        let parent = self.prev.as_deref()?;
        let frame = CallFrame {
            visits: self.visits.clone(),
            turn_count: self.turn_count,
            choice_count: self.choice_count,
            globals: self.globals.clone(),
            eval_stack: self.eval_stack.clone(),
            list_defs: self.list_defs.clone(),
            rng: self.rng.clone(),
            locals: parent.locals.clone(),
            call_depth: parent.call_depth,
            is_function: parent.is_function,
            prev: parent.prev.clone(),
            return_to: parent.return_to,
            return_visits: parent.return_visits.clone(),
            return_stepper: parent.return_stepper.clone(),
        };
        Some((
            frame,
            self.return_to,
            self.return_visits.clone(),
            self.return_stepper.clone(),
            self.is_function,
        ))
    }

    /// Unwind the entire call stack, keeping the story-global fields.
    pub fn unwind(&self) -> CallFrame {
        let mut frame = self.clone();
        while let Some((parent, _, _, _, _)) = frame.pop_frame() {
            frame = parent;
        }
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::ContainerFlags;

    fn frame() -> CallFrame {
        CallFrame::root(Rc::new(ListDefs::default()), 42)
    }

    fn visit(addr: &str) -> VisitAddr {
        VisitAddr {
            addr: Address::from(addr),
            flags: ContainerFlags(ContainerFlags::RECORD_VISITS),
            entry_index: 0,
        }
    }

    #[test]
    fn test_push_pop_values() {
        let f = frame().push_val(Value::Int(1)).push_val(Value::Int(2));
        let (v, f) = f.pop_val().unwrap();
        assert_eq!(v, Value::Int(2));
        let (v, f) = f.pop_val().unwrap();
        assert_eq!(v, Value::Int(1));
        assert!(matches!(f.pop_val(), Err(Error::StackUnderflow)));
    }

    #[test]
    fn test_persistence_of_eval_stack() {
        let base = frame().push_val(Value::Int(1));
        let grown = base.push_val(Value::Int(2));
        // the original frame is untouched
        assert_eq!(base.eval_depth(), 1);
        assert_eq!(grown.eval_depth(), 2);
    }

    #[test]
    fn test_locals_shadow_globals() {
        let f = frame()
            .set_global("x", Value::Int(1))
            .declare_local("x", Value::Int(2));
        assert_eq!(f.get_var("x"), Some(Value::Int(2)));
    }

    #[test]
    fn test_update_var_prefers_local_scope() {
        let f = frame()
            .set_global("x", Value::Int(1))
            .declare_local("x", Value::Int(2));
        let f = f.update_var("x", Value::Int(3)).unwrap();
        assert_eq!(f.get_var("x"), Some(Value::Int(3)));
        // the global binding is untouched
        let popped = f.set_global("probe", Value::Void);
        assert_eq!(popped.globals.get("x"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_unknown_update_declares_global() {
        let f = frame().update_var("fresh", Value::Int(9)).unwrap();
        assert_eq!(f.get_var("fresh"), Some(Value::Int(9)));
    }

    #[test]
    fn test_globals_flow_through_frames() {
        let f = frame().set_global("x", Value::Int(1));
        let child = f.push_frame(None, Vec::new(), None, true);
        let child = child.set_global("x", Value::Int(2));
        let (parent, _, _, _, was_fn) = child.pop_frame().unwrap();
        assert!(was_fn);
        assert_eq!(parent.get_var("x"), Some(Value::Int(2)));
    }

    #[test]
    fn test_locals_are_frame_private() {
        let f = frame().declare_local("t", Value::Int(1));
        let child = f.push_frame(None, Vec::new(), None, true);
        assert_eq!(child.get_var("t"), None);
        let child = child.declare_local("t", Value::Int(2));
        let (parent, _, _, _, _) = child.pop_frame().unwrap();
        assert_eq!(parent.get_var("t"), Some(Value::Int(1)));
    }

    #[test]
    fn test_var_ref_reads_ancestor_local() {
        let f = frame().declare_local("n", Value::Int(7));
        // a reference bound in the root frame: content index = depth + 1 = 1
        assert_eq!(f.binding_index("n"), 1);
        let child = f.push_frame(None, Vec::new(), None, true).declare_local(
            "r",
            Value::VarRef {
                name: "n".to_string(),
                content_index: 1,
            },
        );
        assert_eq!(child.get_var("r"), Some(Value::Int(7)));
    }

    #[test]
    fn test_var_ref_writes_ancestor_local() {
        let f = frame().declare_local("n", Value::Int(7));
        let child = f.push_frame(None, Vec::new(), None, true).declare_local(
            "r",
            Value::VarRef {
                name: "n".to_string(),
                content_index: 1,
            },
        );
        let child = child.update_var("r", Value::Int(8)).unwrap();
        let (parent, _, _, _, _) = child.pop_frame().unwrap();
        assert_eq!(parent.get_var("n"), Some(Value::Int(8)));
    }

    #[test]
    fn test_visit_runs_counted_once() {
        let f = frame();
        let f = f.visit_all(&[visit("knot"), visit("knot.0")]);
        let f = f.visit_all(&[visit("other")]);
        let f = f.visit_all(&[visit("knot")]);
        assert_eq!(f.visit_count(&Address::from("knot")), 2);
        assert_eq!(f.visit_count(&Address::from("other")), 1);
        assert_eq!(f.visit_count(&Address::from("missing")), 0);
    }

    #[test]
    fn test_consecutive_same_address_dedupes() {
        let f = frame().visit_all(&[visit("knot")]).visit_all(&[visit("knot")]);
        assert_eq!(f.visit_count(&Address::from("knot")), 1);
    }

    #[test]
    fn test_unflagged_entries_not_recorded() {
        let f = frame().visit_all(&[VisitAddr {
            addr: Address::from("plain"),
            flags: ContainerFlags::default(),
            entry_index: 0,
        }]);
        assert_eq!(f.visit_count(&Address::from("plain")), 0);
    }

    #[test]
    fn test_start_only_entries_filtered() {
        let flags = ContainerFlags(ContainerFlags::RECORD_VISITS | ContainerFlags::COUNT_START_ONLY);
        let f = frame()
            .visit_all(&[VisitAddr {
                addr: Address::from("gather"),
                flags,
                entry_index: 2,
            }])
            .visit_all(&[VisitAddr {
                addr: Address::from("gather"),
                flags,
                entry_index: 0,
            }]);
        assert_eq!(f.visit_count(&Address::from("gather")), 1);
    }

    #[test]
    fn test_turns_since() {
        let f = frame().visit_all(&[visit("knot")]);
        assert_eq!(f.turns_since(&Address::from("knot")), 0);
        let f = f.inc_turn().inc_turn();
        assert_eq!(f.turns_since(&Address::from("knot")), 2);
        assert_eq!(f.turns_since(&Address::from("never")), -1);
    }

    #[test]
    fn test_unwind_keeps_shared_state() {
        let f = frame().set_global("x", Value::Int(1));
        let deep = f
            .push_frame(None, Vec::new(), None, false)
            .push_frame(None, Vec::new(), None, true)
            .set_global("x", Value::Int(5));
        let unwound = deep.unwind();
        assert!(!unwound.has_parent());
        assert_eq!(unwound.get_var("x"), Some(Value::Int(5)));
    }
}
