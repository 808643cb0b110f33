//! Sub-evaluator state machines
//!
//! Execution is split across four stepper modes: Base drives flow control and
//! text emission, Eval drives operand evaluation, StringAssembly accumulates a
//! computed string, and Tag discards tag content. Steppers form a LIFO via
//! their `prev` links; a step consumes one element and returns at most one
//! output fragment and/or one choice record, the next element, and the
//! stepper to continue with.

use tracing::trace;

use crate::address::Address;
use crate::error::{Error, Result};
use crate::frame::CallFrame;
use crate::glue::{strip_inline, FUNC_END, FUNC_START, GLUE};
use crate::tree::{ChoiceFlags, Element, Node, Story, VisitAddr};
use crate::value::{apply_binary, apply_unary, Value};

/// The active sub-evaluator.
#[derive(Debug, Clone)]
pub enum Stepper {
    /// Flow control and text emission.
    Base,
    /// Operand evaluation between `ev` and `/ev`.
    Eval { prev: Box<Stepper> },
    /// String assembly between `str` and `/str`.
    StringAssembly { prev: Box<Stepper>, buf: String },
    /// Output-capturing shim around an inner stepper while a string is being
    /// assembled; everything the inner stepper emits lands in `buf`.
    StringWrapped { wrapped: Box<Stepper>, buf: String },
    /// Tag content between `#` and `/#`.
    Tag { prev: Box<Stepper> },
}

/// A choice produced by a choice point, before the outer evaluator attaches
/// its continuation snapshot.
#[derive(Debug, Clone)]
pub struct PendingChoice {
    pub label: String,
    pub dest: Element,
    pub dest_visits: Vec<VisitAddr>,
    pub is_invisible_default: bool,
}

/// Result of one stepper step.
#[derive(Debug)]
pub struct StepResult {
    pub output: String,
    pub choice: Option<PendingChoice>,
    pub next: Option<(Element, Vec<VisitAddr>)>,
    pub frame: CallFrame,
    pub stepper: Stepper,
    /// Set by `end`: unwind everything and discard pending choices.
    pub ended: bool,
}

impl StepResult {
    fn flow(frame: CallFrame, stepper: Stepper, next: Option<(Element, Vec<VisitAddr>)>) -> Self {
        Self {
            output: String::new(),
            choice: None,
            next,
            frame,
            stepper,
            ended: false,
        }
    }

    fn emit(
        output: impl Into<String>,
        frame: CallFrame,
        stepper: Stepper,
        next: Option<(Element, Vec<VisitAddr>)>,
    ) -> Self {
        Self {
            output: output.into(),
            ..Self::flow(frame, stepper, next)
        }
    }
}

impl Stepper {
    /// Execute the node under the cursor.
    pub fn step(self, story: &Story, frame: CallFrame, el: Element) -> Result<StepResult> {
        trace!(node = ?story.node(el), stepper = ?self.name(), "step");
        match self {
            Stepper::Base => step_base(story, frame, el),
            Stepper::Eval { prev } => step_eval(*prev, story, frame, el),
            Stepper::StringAssembly { prev, buf } => step_string(*prev, buf, story, frame, el),
            Stepper::StringWrapped { wrapped, buf } => step_wrapped(*wrapped, buf, story, frame, el),
            Stepper::Tag { prev } => step_tag(*prev, story, frame, el),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Stepper::Base => "base",
            Stepper::Eval { .. } => "eval",
            Stepper::StringAssembly { .. } => "string",
            Stepper::StringWrapped { .. } => "string-wrapped",
            Stepper::Tag { .. } => "tag",
        }
    }
}

fn eval(prev: Stepper) -> Stepper {
    Stepper::Eval {
        prev: Box::new(prev),
    }
}

/// Adapt `Story::next`'s `(Option<Element>, Vec<VisitAddr>)` shape to the
/// `Option<(Element, Vec<VisitAddr>)>` shape `StepResult::next` expects.
fn next_of(next: (Option<Element>, Vec<VisitAddr>)) -> Option<(Element, Vec<VisitAddr>)> {
    let (el, visits) = next;
    el.map(|el| (el, visits))
}

fn unexpected(node: &Node, mode: &'static str) -> Error {
    Error::UnexpectedNode {
        node: format!("{node:?}"),
        mode,
    }
}

fn step_base(story: &Story, frame: CallFrame, el: Element) -> Result<StepResult> {
    let node = story.node(el).clone();
    match node {
        Node::Text(s) => Ok(StepResult::emit(s, frame, Stepper::Base, next_of(story.next(el)))),
        Node::Newline => Ok(StepResult::emit("\n", frame, Stepper::Base, next_of(story.next(el)))),
        Node::Glue => Ok(StepResult::emit(
            GLUE.to_string(),
            frame,
            Stepper::Base,
            next_of(story.next(el)),
        )),
        Node::BeginEval => Ok(StepResult::flow(
            frame,
            eval(Stepper::Base),
            next_of(story.next(el)),
        )),
        Node::BeginTag => Ok(StepResult::flow(
            frame,
            Stepper::Tag {
                prev: Box::new(Stepper::Base),
            },
            next_of(story.next(el)),
        )),
        Node::SetTemp { name, reassign } => {
            let (value, frame) = frame.pop_val()?;
            let frame = if reassign {
                frame.update_local(&name, value)
            } else {
                frame.declare_local(&name, value)
            };
            Ok(StepResult::flow(frame, Stepper::Base, next_of(story.next(el))))
        }
        Node::SetVar { name, reassign } => {
            let (value, frame) = frame.pop_val()?;
            let frame = if reassign {
                frame.update_var(&name, value)?
            } else {
                frame.set_global(&name, value)
            };
            Ok(StepResult::flow(frame, Stepper::Base, next_of(story.next(el))))
        }
        Node::Pop => {
            let (_, frame) = frame.pop_val()?;
            Ok(StepResult::flow(frame, Stepper::Base, next_of(story.next(el))))
        }
        Node::DupTop => {
            let (value, frame) = frame.pop_val()?;
            let frame = frame.push_val(value.clone()).push_val(value);
            Ok(StepResult::flow(frame, Stepper::Base, next_of(story.next(el))))
        }
        Node::Divert {
            dest,
            var,
            conditional,
        } => divert(story, frame, el, dest, var, conditional, Stepper::Base),
        Node::ChoicePoint { dest, flags } => choice_point(story, frame, el, dest, flags),
        Node::FuncReturn => {
            let (parent, ret, ret_visits, ret_stepper, was_fn) =
                frame.pop_frame().ok_or(Error::ReturnOutsideFunction)?;
            if !was_fn {
                return Err(Error::ReturnOutsideFunction);
            }
            Ok(StepResult::emit(
                FUNC_END.to_string(),
                parent,
                ret_stepper.unwrap_or(Stepper::Base),
                ret.map(|e| (e, ret_visits)),
            ))
        }
        Node::TunnelCall { dest } => {
            let (ret, ret_visits) = story.next(el);
            let frame = frame.push_frame(ret, ret_visits, Some(Stepper::Base), false);
            let (dest_el, visits) = story.find(el, &dest)?;
            Ok(StepResult::flow(frame, Stepper::Base, Some((dest_el, visits))))
        }
        Node::TunnelReturn => {
            let (value, frame) = frame.pop_val()?;
            let (parent, ret, ret_visits, ret_stepper, was_fn) =
                frame.pop_frame().ok_or(Error::TunnelReturnOutsideTunnel)?;
            if was_fn {
                return Err(Error::TunnelReturnOutsideTunnel);
            }
            let stepper = ret_stepper.unwrap_or(Stepper::Base);
            match value {
                Value::Void => Ok(StepResult::flow(
                    parent,
                    stepper,
                    ret.map(|e| (e, ret_visits)),
                )),
                Value::DivertTarget(addr) => {
                    let (dest_el, visits) = story.find(el, &addr)?;
                    Ok(StepResult::flow(parent, stepper, Some((dest_el, visits))))
                }
                other => Err(Error::TypeMismatch {
                    expected: "void or divert target",
                    found: other.kind(),
                }),
            }
        }
        Node::ThreadStart => {
            // Threaded flow keeps the caller's return continuation; how
            // threaded state reconciles at later choices is an open gap.
            let (ret, ret_visits, ret_stepper) = frame.retained_return();
            let frame = frame.push_frame(ret, ret_visits, ret_stepper, false);
            Ok(StepResult::flow(frame, Stepper::Base, next_of(story.next(el))))
        }
        Node::NoOp | Node::Literal(_) => {
            // raw literals outside evaluation are ignored
            Ok(StepResult::flow(frame, Stepper::Base, next_of(story.next(el))))
        }
        Node::Out => {
            let (value, frame) = frame.pop_val()?;
            Ok(StepResult::emit(
                value.output()?,
                frame,
                Stepper::Base,
                next_of(story.next(el)),
            ))
        }
        Node::Done => Ok(StepResult::flow(frame, Stepper::Base, None)),
        Node::End => Ok(StepResult {
            ended: true,
            ..StepResult::flow(frame, Stepper::Base, None)
        }),
        other => Err(unexpected(&other, "base")),
    }
}

fn step_eval(prev: Stepper, story: &Story, frame: CallFrame, el: Element) -> Result<StepResult> {
    let node = story.node(el).clone();
    let next = next_of(story.next(el));
    match node {
        Node::BeginStringEval => Ok(StepResult::flow(
            frame,
            Stepper::StringAssembly {
                prev: Box::new(eval(prev)),
                buf: String::new(),
            },
            next,
        )),
        Node::BeginEval => Ok(StepResult::flow(frame, eval(eval(prev)), next)),
        Node::EndEval => Ok(StepResult::flow(frame, prev, next)),
        Node::GetVar { name } => {
            let value = frame
                .get_var(&name)
                .ok_or_else(|| Error::VariableNotFound(name.clone()))?;
            Ok(StepResult::flow(frame.push_val(value), eval(prev), next))
        }
        Node::SetVar { name, reassign } => {
            let (value, frame) = frame.pop_val()?;
            let frame = if reassign {
                frame.update_var(&name, value)?
            } else {
                frame.set_global(&name, value)
            };
            Ok(StepResult::flow(frame, eval(prev), next))
        }
        Node::SetTemp { name, reassign } => {
            let (value, frame) = frame.pop_val()?;
            let frame = if reassign {
                frame.update_local(&name, value)
            } else {
                frame.declare_local(&name, value)
            };
            Ok(StepResult::flow(frame, eval(prev), next))
        }
        Node::Text(s) => Ok(StepResult::flow(
            frame.push_val(Value::Str(s)),
            eval(prev),
            next,
        )),
        Node::Literal(value) => Ok(StepResult::flow(frame.push_val(value), eval(prev), next)),
        Node::Binary(op) => {
            let (b, frame) = frame.pop_val()?;
            let (a, frame) = frame.pop_val()?;
            let value = apply_binary(op, &a, &b, frame.list_defs())?;
            Ok(StepResult::flow(frame.push_val(value), eval(prev), next))
        }
        Node::Unary(op) => {
            let (a, frame) = frame.pop_val()?;
            let value = apply_unary(op, &a)?;
            Ok(StepResult::flow(frame.push_val(value), eval(prev), next))
        }
        Node::Divert {
            dest,
            var,
            conditional,
        } => divert(story, frame, el, dest, var, conditional, eval(prev)),
        Node::FuncCall { dest } => {
            let (ret, ret_visits) = story.next(el);
            let frame = frame.push_frame(ret, ret_visits, Some(eval(prev)), true);
            let (dest_el, visits) = story.find(el, &dest)?;
            Ok(StepResult::emit(
                FUNC_START.to_string(),
                frame,
                Stepper::Base,
                Some((dest_el, visits)),
            ))
        }
        Node::TurnCounter => Ok(StepResult::flow(
            frame.push_val(Value::Int(frame.turn_count() as i64)),
            eval(prev),
            next,
        )),
        Node::ChoiceCount => Ok(StepResult::flow(
            frame.push_val(Value::Int(frame.choice_count() as i64)),
            eval(prev),
            next,
        )),
        Node::GetVisitCount { container } => {
            let addr = counted_address(story, el, &Address::new(container))?;
            let count = frame.visit_count(&addr) as i64;
            Ok(StepResult::flow(
                frame.push_val(Value::Int(count)),
                eval(prev),
                next,
            ))
        }
        Node::VisitIndex => {
            let current = story.address_of(el).0;
            let count = frame.visit_count(&current) as i64;
            Ok(StepResult::flow(
                frame.push_val(Value::Int(count - 1)),
                eval(prev),
                next,
            ))
        }
        Node::ReadCount => {
            let (value, frame) = frame.pop_val()?;
            let addr = counted_address(story, el, value.as_divert_target()?)?;
            let count = frame.visit_count(&addr) as i64;
            Ok(StepResult::flow(
                frame.push_val(Value::Int(count)),
                eval(prev),
                next,
            ))
        }
        Node::TurnsSince => {
            let (value, frame) = frame.pop_val()?;
            let addr = counted_address(story, el, value.as_divert_target()?)?;
            Ok(StepResult::flow(
                frame.push_val(Value::Int(frame.turns_since(&addr))),
                eval(prev),
                next,
            ))
        }
        Node::VarRef {
            name,
            content_index,
        } => Ok(StepResult::flow(
            frame.push_val(Value::VarRef {
                name,
                content_index,
            }),
            eval(prev),
            next,
        )),
        Node::ListInt => {
            let (value, frame) = frame.pop_val()?;
            let (origin, frame) = frame.pop_val()?;
            let origin = origin.as_str()?;
            let list = match frame.list_defs().item(origin, value.as_int()?) {
                Some(item) => crate::list::ListValue::single(item),
                None => crate::list::ListValue::with_origins([origin.to_string()]),
            };
            Ok(StepResult::flow(
                frame.push_val(Value::List(list)),
                eval(prev),
                next,
            ))
        }
        Node::ListValueOf => {
            let (value, frame) = frame.pop_val()?;
            let out = Value::Int(value.as_list()?.value_of());
            Ok(StepResult::flow(frame.push_val(out), eval(prev), next))
        }
        Node::ListCount => {
            let (value, frame) = frame.pop_val()?;
            let out = Value::Int(value.as_list()?.len() as i64);
            Ok(StepResult::flow(frame.push_val(out), eval(prev), next))
        }
        Node::ListMin => {
            let (value, frame) = frame.pop_val()?;
            let out = Value::List(value.as_list()?.min());
            Ok(StepResult::flow(frame.push_val(out), eval(prev), next))
        }
        Node::ListMax => {
            let (value, frame) = frame.pop_val()?;
            let out = Value::List(value.as_list()?.max());
            Ok(StepResult::flow(frame.push_val(out), eval(prev), next))
        }
        Node::ListAll => {
            let (value, frame) = frame.pop_val()?;
            let out = Value::List(value.as_list()?.all(frame.list_defs()));
            Ok(StepResult::flow(frame.push_val(out), eval(prev), next))
        }
        Node::ListInvert => {
            let (value, frame) = frame.pop_val()?;
            let out = Value::List(value.as_list()?.invert(frame.list_defs()));
            Ok(StepResult::flow(frame.push_val(out), eval(prev), next))
        }
        Node::ListIntersect => {
            let (b, frame) = frame.pop_val()?;
            let (a, frame) = frame.pop_val()?;
            let out = Value::List(a.as_list()?.intersect(b.as_list()?));
            Ok(StepResult::flow(frame.push_val(out), eval(prev), next))
        }
        Node::ListRange => {
            let (hi, frame) = frame.pop_val()?;
            let (lo, frame) = frame.pop_val()?;
            let (list, frame) = frame.pop_val()?;
            let out = Value::List(
                list.as_list()?
                    .range(bound_value(&lo)?, bound_value(&hi)?),
            );
            Ok(StepResult::flow(frame.push_val(out), eval(prev), next))
        }
        Node::Seq => {
            let (elements, frame) = frame.pop_val()?;
            let (seq_count, frame) = frame.pop_val()?;
            let address = story.address_of(el).0;
            let index =
                frame
                    .rng()
                    .seq_index(address.as_str(), seq_count.as_int()?, elements.as_int()?);
            Ok(StepResult::flow(
                frame.push_val(Value::Int(index)),
                eval(prev),
                next,
            ))
        }
        Node::Random => {
            let (hi, frame) = frame.pop_val()?;
            let (lo, frame) = frame.pop_val()?;
            let mut rng = frame.rng().clone();
            let value = rng.rand_range(lo.as_int()?, hi.as_int()?);
            let frame = frame.with_rng(rng).push_val(Value::Int(value));
            Ok(StepResult::flow(frame, eval(prev), next))
        }
        Node::SeedRandom => {
            let (seed, frame) = frame.pop_val()?;
            let mut rng = frame.rng().clone();
            rng.reseed(seed.as_int()? as u64);
            let frame = frame.with_rng(rng).push_val(Value::Void);
            Ok(StepResult::flow(frame, eval(prev), next))
        }
        Node::Out => {
            let (value, frame) = frame.pop_val()?;
            Ok(StepResult::emit(value.output()?, frame, eval(prev), next))
        }
        Node::Pop => {
            let (_, frame) = frame.pop_val()?;
            Ok(StepResult::flow(frame, eval(prev), next))
        }
        Node::DupTop => {
            let (value, frame) = frame.pop_val()?;
            let frame = frame.push_val(value.clone()).push_val(value);
            Ok(StepResult::flow(frame, eval(prev), next))
        }
        Node::Void => Ok(StepResult::flow(
            frame.push_val(Value::Void),
            eval(prev),
            next,
        )),
        Node::NoOp => Ok(StepResult::flow(frame, eval(prev), next)),
        Node::Done => Ok(StepResult::flow(frame, Stepper::Base, None)),
        Node::End => Ok(StepResult {
            ended: true,
            ..StepResult::flow(frame, Stepper::Base, None)
        }),
        other => Err(unexpected(&other, "eval")),
    }
}

fn step_string(
    prev: Stepper,
    mut buf: String,
    story: &Story,
    frame: CallFrame,
    el: Element,
) -> Result<StepResult> {
    let node = story.node(el).clone();
    let next = next_of(story.next(el));
    match node {
        Node::Text(s) => {
            buf.push_str(&s);
            Ok(StepResult::flow(
                frame,
                Stepper::StringAssembly {
                    prev: Box::new(prev),
                    buf,
                },
                next,
            ))
        }
        Node::NoOp => Ok(StepResult::flow(
            frame,
            Stepper::StringAssembly {
                prev: Box::new(prev),
                buf,
            },
            next,
        )),
        Node::BeginEval => {
            // capture any output of the nested evaluation into this buffer
            let resume = Stepper::StringAssembly {
                prev: Box::new(prev),
                buf: String::new(),
            };
            Ok(StepResult::flow(
                frame,
                Stepper::StringWrapped {
                    wrapped: Box::new(eval(resume)),
                    buf,
                },
                next,
            ))
        }
        Node::Divert {
            dest,
            var,
            conditional,
        } => divert(
            story,
            frame,
            el,
            dest,
            var,
            conditional,
            Stepper::StringAssembly {
                prev: Box::new(prev),
                buf,
            },
        ),
        Node::BeginTag => Ok(StepResult::flow(
            frame,
            Stepper::Tag {
                prev: Box::new(Stepper::StringAssembly {
                    prev: Box::new(prev),
                    buf,
                }),
            },
            next,
        )),
        Node::EndStringEval => {
            let frame = frame.push_val(Value::Str(strip_inline(&buf)));
            Ok(StepResult::flow(frame, prev, next))
        }
        other => Err(unexpected(&other, "string")),
    }
}

fn step_wrapped(
    wrapped: Stepper,
    mut buf: String,
    story: &Story,
    frame: CallFrame,
    el: Element,
) -> Result<StepResult> {
    let inner = wrapped.step(story, frame, el)?;
    buf.push_str(&inner.output);
    let stepper = match inner.stepper {
        // the nested evaluation closed; hand the buffer back to assembly
        Stepper::StringAssembly {
            prev,
            buf: assembled,
        } => {
            buf.push_str(&assembled);
            Stepper::StringAssembly {
                prev,
                buf,
            }
        }
        other => Stepper::StringWrapped {
            wrapped: Box::new(other),
            buf,
        },
    };
    Ok(StepResult {
        output: String::new(),
        choice: inner.choice,
        next: inner.next,
        frame: inner.frame,
        stepper,
        ended: inner.ended,
    })
}

fn step_tag(prev: Stepper, story: &Story, frame: CallFrame, el: Element) -> Result<StepResult> {
    let node = story.node(el).clone();
    let next = next_of(story.next(el));
    match node {
        // TODO route tags to the surrounding output once a tag model exists
        Node::Text(_) => Ok(StepResult::flow(
            frame,
            Stepper::Tag {
                prev: Box::new(prev),
            },
            next,
        )),
        Node::EndTag => Ok(StepResult::flow(frame, prev, next)),
        other => Err(unexpected(&other, "tag")),
    }
}

fn divert(
    story: &Story,
    frame: CallFrame,
    el: Element,
    dest: Address,
    var: bool,
    conditional: bool,
    stepper: Stepper,
) -> Result<StepResult> {
    let mut frame = frame;
    let mut addr = dest;
    if var {
        let value = frame
            .get_var(addr.as_str())
            .ok_or_else(|| Error::VariableNotFound(addr.to_string()))?;
        addr = value.as_divert_target()?.clone();
    }
    if conditional {
        let (cond, popped) = frame.pop_val()?;
        frame = popped;
        if !cond.truthy()? {
            return Ok(StepResult::flow(frame, stepper, next_of(story.next(el))));
        }
    }
    let (dest_el, visits) = story.find(el, &addr)?;
    Ok(StepResult::flow(frame, stepper, Some((dest_el, visits))))
}

fn choice_point(
    story: &Story,
    frame: CallFrame,
    el: Element,
    dest: Address,
    flags: ChoiceFlags,
) -> Result<StepResult> {
    let mut frame = frame;
    let mut enabled = true;
    if flags.has_condition() {
        let (cond, popped) = frame.pop_val()?;
        frame = popped;
        if !cond.truthy()? {
            enabled = false;
        }
    }
    let mut label = String::new();
    if flags.has_choice_only_content() {
        let (value, popped) = frame.pop_val()?;
        frame = popped;
        label = value.as_str()?.to_string();
    }
    if flags.has_start_content() {
        let (value, popped) = frame.pop_val()?;
        frame = popped;
        label = format!("{}{}", value.as_str()?, label);
    }
    if enabled && flags.once_only() {
        let addr = counted_address(story, el, &dest)?;
        if frame.visit_count(&addr) > 0 {
            enabled = false;
        }
    }
    let choice = if enabled {
        let (dest_el, dest_visits) = story.find(el, &dest)?;
        frame = frame.inc_choice();
        Some(PendingChoice {
            label,
            dest: dest_el,
            dest_visits,
            is_invisible_default: flags.is_invisible_default(),
        })
    } else {
        None
    };
    Ok(StepResult {
        choice,
        ..StepResult::flow(frame, Stepper::Base, next_of(story.next(el)))
    })
}

/// The container address visit counters should consult for a destination.
fn counted_address(story: &Story, el: Element, dest: &Address) -> Result<Address> {
    let raw = story.locate(el, dest)?;
    let target = story.target_container(raw);
    Ok(story.container(target).address.clone())
}

fn bound_value(v: &Value) -> Result<i64> {
    match v {
        Value::List(l) => Ok(l.value_of()),
        other => other.as_int(),
    }
}
