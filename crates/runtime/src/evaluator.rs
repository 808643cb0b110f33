//! Outer evaluator and drive loop
//!
//! Wraps the active stepper with frame-popping on end-of-flow, snapshots
//! choice continuations, and drives execution until the story needs a
//! selection or ends.

use std::rc::Rc;

use tracing::{debug, instrument, trace};

use crate::address::Address;
use crate::error::{Error, Result};
use crate::frame::CallFrame;
use crate::glue::{GlueWriter, FUNC_END};
use crate::stepper::{StepResult, Stepper};
use crate::tree::{Element, Story, VisitAddr};
use crate::value::Value;

/// A selectable branch presented to the caller.
///
/// Selecting a choice resumes execution from a frame snapshot taken when the
/// choice point ran, so unselected choices leave no trace.
#[derive(Debug, Clone)]
pub struct Choice {
    pub label: String,
    is_invisible_default: bool,
    dest: Element,
    dest_visits: Vec<VisitAddr>,
    frame: CallFrame,
}

/// A story's execution state: the current frame, stepper, and cursor.
#[derive(Debug)]
pub struct Evaluator {
    story: Rc<Story>,
    frame: CallFrame,
    stepper: Stepper,
    elem: Option<Element>,
    pending: Vec<VisitAddr>,
    ended: bool,
}

impl Evaluator {
    /// Build the root frame and position at the story's first element.
    ///
    /// If the tree carries a `global decl` container it is evaluated to
    /// completion first; it must produce no output and no choices.
    pub fn new(story: Rc<Story>, seed: u64) -> Result<Evaluator> {
        let frame = CallFrame::root(story.list_defs().clone(), seed);
        let mut eval = Evaluator {
            story: story.clone(),
            frame,
            stepper: Stepper::Base,
            elem: None,
            pending: Vec::new(),
            ended: false,
        };
        let root_start = Element {
            container: story.root(),
            index: 0,
        };
        if let Ok((decl, visits)) = story.find(root_start, &Address::from("global decl")) {
            debug!("evaluating global declarations");
            eval.elem = Some(decl);
            eval.pending = visits;
            while eval.elem.is_some() {
                let (output, choice) = eval.step()?;
                if !output.is_empty() {
                    return Err(Error::UnexpectedOutput(output));
                }
                if let Some(c) = choice {
                    return Err(Error::UnexpectedChoice(c.label));
                }
            }
            eval.stepper = Stepper::Base;
            eval.ended = false;
        }
        let (first, visits) = story.first();
        eval.elem = first;
        eval.pending = visits;
        Ok(eval)
    }

    /// Whether the story has run out of flow.
    pub fn is_finished(&self) -> bool {
        self.elem.is_none()
    }

    /// Resume from a selected choice.
    pub fn choose(&mut self, choice: &Choice) {
        self.frame = choice.frame.clone();
        self.stepper = Stepper::Base;
        self.elem = Some(choice.dest);
        self.pending = choice.dest_visits.clone();
        self.ended = false;
    }

    /// Drive execution until the flow needs a selection or ends.
    ///
    /// Output fragments stream into the glue writer. Visible choices are
    /// collected; if flow runs out with none, the most recent invisible
    /// default (if any) is followed transparently.
    #[instrument(skip_all)]
    pub fn continue_story(&mut self, out: &mut GlueWriter) -> Result<Vec<Choice>> {
        let mut choices: Vec<Choice> = Vec::new();
        let mut fallback: Option<Choice> = None;
        loop {
            while self.elem.is_some() {
                let (output, choice) = self.step()?;
                if !output.is_empty() {
                    trace!(?output, "emit");
                    out.write_str(&output);
                }
                if let Some(c) = choice {
                    if c.is_invisible_default {
                        fallback = Some(c);
                    } else {
                        choices.push(c);
                    }
                }
                if self.ended {
                    debug!("story ended, discarding pending choices");
                    return Ok(Vec::new());
                }
            }
            if choices.is_empty() {
                if let Some(default) = fallback.take() {
                    debug!("following invisible default choice");
                    self.choose(&default);
                    continue;
                }
            }
            return Ok(choices);
        }
    }

    /// One outer step: apply pending visits, run the stepper, and handle
    /// end-of-flow frame pops and choice snapshots.
    fn step(&mut self) -> Result<(String, Option<Choice>)> {
        let el = match self.elem {
            Some(el) => el,
            None => return Ok((String::new(), None)),
        };
        let frame = self.frame.visit_all(&self.pending);
        self.pending.clear();
        let stepper = std::mem::replace(&mut self.stepper, Stepper::Base);
        let StepResult {
            output,
            choice,
            next,
            frame,
            stepper,
            ended,
        } = stepper.step(&self.story, frame, el)?;
        let mut output = output;
        self.frame = frame;
        self.stepper = stepper;

        let choice = choice.map(|pending| {
            // The continuation starts a fresh drive cycle: choice count
            // resets, and picking a visible choice consumes a turn.
            let mut snapshot = self.frame.reset_choice_count();
            if !pending.is_invisible_default {
                snapshot = snapshot.inc_turn();
            }
            Choice {
                label: pending.label,
                is_invisible_default: pending.is_invisible_default,
                dest: pending.dest,
                dest_visits: pending.dest_visits,
                frame: snapshot,
            }
        });

        if ended {
            self.frame = self.frame.unwind();
            self.elem = None;
            self.ended = true;
            return Ok((output, choice));
        }

        match next {
            Some((el, visits)) => {
                self.elem = Some(el);
                self.pending = visits;
            }
            None => {
                // End of flow: pop one call frame if there is one, restoring
                // its return continuation. A finished function pushes its
                // default Void result and closes its output span.
                match self.frame.pop_frame() {
                    Some((parent, ret, ret_visits, ret_stepper, was_function)) => {
                        self.frame = parent;
                        let restored = ret_stepper.unwrap_or(Stepper::Base);
                        match std::mem::replace(&mut self.stepper, Stepper::Base) {
                            Stepper::StringWrapped { mut buf, .. } => {
                                if was_function {
                                    buf.push(FUNC_END);
                                }
                                self.stepper = Stepper::StringWrapped {
                                    wrapped: Box::new(restored),
                                    buf,
                                };
                            }
                            _ => {
                                if was_function {
                                    output.push(FUNC_END);
                                }
                                self.stepper = restored;
                            }
                        }
                        if was_function {
                            self.frame = self.frame.push_val(Value::Void);
                        }
                        self.elem = ret;
                        self.pending = ret_visits;
                    }
                    None => {
                        self.elem = None;
                    }
                }
            }
        }
        Ok((output, choice))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::list::ListDefs;
    use crate::tree::{
        ChoiceFlags, ContainerFlags, ContainerId, Node, StoryBuilder,
    };
    use crate::value::BinaryOp;
    use indexmap::IndexMap;

    fn text(s: &str) -> Node {
        Node::Text(s.to_string())
    }

    fn choice_flags(bits: u32) -> ChoiceFlags {
        ChoiceFlags(bits)
    }

    fn build(f: impl FnOnce(&mut StoryBuilder, ContainerId)) -> Rc<Story> {
        build_with_defs(ListDefs::default(), f)
    }

    fn build_with_defs(
        defs: ListDefs,
        f: impl FnOnce(&mut StoryBuilder, ContainerId),
    ) -> Rc<Story> {
        let mut b = StoryBuilder::new();
        let root = b.reserve(None, None);
        f(&mut b, root);
        Rc::new(b.build(root, defs))
    }

    fn run(story: &Rc<Story>) -> (String, Vec<Choice>, Evaluator) {
        let mut eval = Evaluator::new(story.clone(), 42).unwrap();
        let mut w = GlueWriter::new();
        let choices = eval.continue_story(&mut w).unwrap();
        w.write_end();
        (w.take(), choices, eval)
    }

    fn resume(eval: &mut Evaluator, choice: &Choice) -> (String, Vec<Choice>) {
        eval.choose(choice);
        let mut w = GlueWriter::new();
        let choices = eval.continue_story(&mut w).unwrap();
        w.write_end();
        (w.take(), choices)
    }

    /// Nested container with a name, registered under its parent.
    fn nested(
        b: &mut StoryBuilder,
        parent: ContainerId,
        name: &str,
        contents: Vec<Node>,
    ) -> ContainerId {
        let id = b.reserve(Some(parent), None);
        b.container_mut(id).name = Some(name.to_string());
        b.container_mut(id).contents = contents;
        b.container_mut(parent).nested.insert(name.to_string(), id);
        id
    }

    #[test]
    fn test_simple_text_output() {
        let story = build(|b, root| {
            b.container_mut(root).contents =
                vec![text("Once upon a time..."), Node::Newline, Node::Done];
        });
        let (output, choices, _) = run(&story);
        assert_eq!(output, "Once upon a time...\n");
        assert!(choices.is_empty());
    }

    #[test]
    fn test_single_choice() {
        let story = build(|b, root| {
            let inner = b.reserve(Some(root), Some(0));
            b.container_mut(inner).contents = vec![
                text("Once upon a time..."),
                Node::Newline,
                Node::BeginEval,
                Node::BeginStringEval,
                text("choice"),
                Node::EndStringEval,
                Node::EndEval,
                Node::ChoicePoint {
                    dest: Address::from("0.c-0"),
                    flags: choice_flags(20),
                },
            ];
            nested(
                b,
                inner,
                "c-0",
                vec![text("The end."), Node::Newline, Node::Done],
            );
            b.container_mut(root).contents = vec![Node::Container(inner), Node::Done];
        });
        let (output, choices, mut eval) = run(&story);
        assert_eq!(output, "Once upon a time...\n");
        let labels: Vec<&str> = choices.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["choice"]);

        let (output, choices) = resume(&mut eval, &choices[0]);
        assert_eq!(output, "The end.\n");
        assert!(choices.is_empty());
    }

    #[test]
    fn test_invisible_default_followed_on_loose_end() {
        let story = build(|b, root| {
            let inner = b.reserve(Some(root), Some(0));
            b.container_mut(inner).contents = vec![
                text("Once upon a time..."),
                Node::Newline,
                Node::BeginEval,
                Node::BeginStringEval,
                text("choice"),
                Node::EndStringEval,
                Node::EndEval,
                Node::ChoicePoint {
                    dest: Address::from("0.c-0"),
                    flags: choice_flags(
                        ChoiceFlags::HAS_CHOICE_ONLY_CONTENT | ChoiceFlags::IS_INVISIBLE_DEFAULT,
                    ),
                },
            ];
            nested(
                b,
                inner,
                "c-0",
                vec![text("The end."), Node::Newline, Node::Done],
            );
            b.container_mut(root).contents = vec![Node::Container(inner), Node::Done];
        });
        let (output, choices, _) = run(&story);
        assert_eq!(output, "Once upon a time...\nThe end.\n");
        assert!(choices.is_empty());
    }

    #[test]
    fn test_eval_arithmetic_output() {
        let story = build(|b, root| {
            b.container_mut(root).contents = vec![
                Node::BeginEval,
                Node::int(2),
                Node::int(2),
                Node::Binary(BinaryOp::Add),
                Node::Out,
                Node::EndEval,
                Node::Newline,
                Node::Done,
            ];
        });
        let (output, _, _) = run(&story);
        assert_eq!(output, "4\n");
    }

    #[test]
    fn test_function_text_joins_inline() {
        let story = build(|b, root| {
            nested(b, root, "fn", vec![text("inside"), Node::Newline]);
            b.container_mut(root).contents = vec![
                text("before "),
                Node::BeginEval,
                Node::FuncCall {
                    dest: Address::from("fn"),
                },
                Node::Out,
                Node::EndEval,
                text(" after"),
                Node::Newline,
                Node::Done,
            ];
        });
        let (output, _, _) = run(&story);
        assert_eq!(output, "before inside after\n");
    }

    #[test]
    fn test_function_return_value() {
        let story = build(|b, root| {
            nested(
                b,
                root,
                "double",
                vec![
                    Node::BeginEval,
                    Node::int(21),
                    Node::int(2),
                    Node::Binary(BinaryOp::Mul),
                    Node::EndEval,
                    Node::FuncReturn,
                ],
            );
            b.container_mut(root).contents = vec![
                Node::BeginEval,
                Node::FuncCall {
                    dest: Address::from("double"),
                },
                Node::Out,
                Node::EndEval,
                Node::Newline,
                Node::Done,
            ];
        });
        let (output, _, _) = run(&story);
        assert_eq!(output, "42\n");
    }

    #[test]
    fn test_temp_and_global_vars() {
        let story = build(|b, root| {
            b.container_mut(root).contents = vec![
                Node::BeginEval,
                Node::int(7),
                Node::SetTemp {
                    name: "x".to_string(),
                    reassign: false,
                },
                Node::GetVar {
                    name: "x".to_string(),
                },
                Node::int(3),
                Node::Binary(BinaryOp::Add),
                Node::SetVar {
                    name: "y".to_string(),
                    reassign: false,
                },
                Node::GetVar {
                    name: "y".to_string(),
                },
                Node::Out,
                Node::EndEval,
                Node::Newline,
                Node::Done,
            ];
        });
        let (output, _, _) = run(&story);
        assert_eq!(output, "10\n");
    }

    #[test]
    fn test_global_decl_runs_before_flow() {
        let story = build(|b, root| {
            nested(
                b,
                root,
                "global decl",
                vec![
                    Node::BeginEval,
                    Node::int(5),
                    Node::SetVar {
                        name: "x".to_string(),
                        reassign: false,
                    },
                    Node::EndEval,
                    Node::End,
                ],
            );
            b.container_mut(root).contents = vec![
                Node::BeginEval,
                Node::GetVar {
                    name: "x".to_string(),
                },
                Node::Out,
                Node::EndEval,
                Node::Newline,
                Node::Done,
            ];
        });
        let (output, _, _) = run(&story);
        assert_eq!(output, "5\n");
    }

    #[test]
    fn test_once_only_choice_disabled_after_selection() {
        let story = build(|b, root| {
            let main = b.reserve(Some(root), Some(0));
            b.container_mut(main).contents = vec![
                Node::BeginEval,
                Node::BeginStringEval,
                text("go"),
                Node::EndStringEval,
                Node::EndEval,
                Node::ChoicePoint {
                    dest: Address::from("0.c-0"),
                    flags: choice_flags(20),
                },
            ];
            let c0 = nested(
                b,
                main,
                "c-0",
                vec![
                    text("Gone."),
                    Node::Newline,
                    Node::Divert {
                        dest: Address::from("0"),
                        var: false,
                        conditional: false,
                    },
                ],
            );
            b.container_mut(c0).flags = ContainerFlags(ContainerFlags::RECORD_VISITS);
            b.container_mut(root).contents = vec![Node::Container(main), Node::Done];
        });
        let (output, choices, mut eval) = run(&story);
        assert_eq!(output, "");
        assert_eq!(choices.len(), 1);

        // Selecting loops back to the choice point, which is now spent.
        let (output, choices) = resume(&mut eval, &choices[0]);
        assert_eq!(output, "Gone.\n");
        assert!(choices.is_empty());
    }

    #[test]
    fn test_choice_condition_disables() {
        let story = build(|b, root| {
            let main = b.reserve(Some(root), Some(0));
            b.container_mut(main).contents = vec![
                Node::BeginEval,
                Node::BeginStringEval,
                text("hidden"),
                Node::EndStringEval,
                Node::int(0),
                Node::EndEval,
                Node::ChoicePoint {
                    dest: Address::from("0.c-0"),
                    flags: choice_flags(
                        ChoiceFlags::HAS_CONDITION | ChoiceFlags::HAS_CHOICE_ONLY_CONTENT,
                    ),
                },
                text("no branch"),
                Node::Newline,
                Node::Done,
            ];
            nested(b, main, "c-0", vec![text("unreachable"), Node::Done]);
            b.container_mut(root).contents = vec![Node::Container(main), Node::Done];
        });
        let (output, choices, _) = run(&story);
        assert_eq!(output, "no branch\n");
        assert!(choices.is_empty());
    }

    #[test]
    fn test_choice_label_from_start_and_choice_only_content() {
        let story = build(|b, root| {
            let main = b.reserve(Some(root), Some(0));
            b.container_mut(main).contents = vec![
                Node::BeginEval,
                Node::BeginStringEval,
                text("Open "),
                Node::EndStringEval,
                Node::BeginStringEval,
                text("the door"),
                Node::EndStringEval,
                Node::EndEval,
                Node::ChoicePoint {
                    dest: Address::from("0.c-0"),
                    flags: choice_flags(
                        ChoiceFlags::HAS_START_CONTENT | ChoiceFlags::HAS_CHOICE_ONLY_CONTENT,
                    ),
                },
                Node::Done,
            ];
            nested(b, main, "c-0", vec![text("Opened."), Node::Done]);
            b.container_mut(root).contents = vec![Node::Container(main), Node::Done];
        });
        let (_, choices, _) = run(&story);
        assert_eq!(choices[0].label, "Open the door");
    }

    #[test]
    fn test_string_label_with_nested_eval() {
        let story = build(|b, root| {
            let main = b.reserve(Some(root), Some(0));
            b.container_mut(main).contents = vec![
                Node::BeginEval,
                Node::int(5),
                Node::SetVar {
                    name: "n".to_string(),
                    reassign: false,
                },
                Node::BeginStringEval,
                text("n = "),
                Node::BeginEval,
                Node::GetVar {
                    name: "n".to_string(),
                },
                Node::Out,
                Node::EndEval,
                Node::EndStringEval,
                Node::EndEval,
                Node::ChoicePoint {
                    dest: Address::from("0.c-0"),
                    flags: choice_flags(ChoiceFlags::HAS_CHOICE_ONLY_CONTENT),
                },
                Node::Done,
            ];
            nested(b, main, "c-0", vec![text("picked"), Node::Done]);
            b.container_mut(root).contents = vec![Node::Container(main), Node::Done];
        });
        let (_, choices, _) = run(&story);
        assert_eq!(choices[0].label, "n = 5");
    }

    #[test]
    fn test_tunnel_call_and_return() {
        let story = build(|b, root| {
            nested(
                b,
                root,
                "t",
                vec![
                    text("t!"),
                    Node::Newline,
                    Node::BeginEval,
                    Node::Void,
                    Node::EndEval,
                    Node::TunnelReturn,
                ],
            );
            b.container_mut(root).contents = vec![
                text("a"),
                Node::Newline,
                Node::TunnelCall {
                    dest: Address::from("t"),
                },
                text("b"),
                Node::Newline,
                Node::Done,
            ];
        });
        let (output, _, _) = run(&story);
        assert_eq!(output, "a\nt!\nb\n");
    }

    #[test]
    fn test_tunnel_return_to_divert_target() {
        let story = build(|b, root| {
            nested(
                b,
                root,
                "t",
                vec![
                    Node::BeginEval,
                    Node::divert_target("after"),
                    Node::EndEval,
                    Node::TunnelReturn,
                ],
            );
            nested(b, root, "after", vec![text("after!"), Node::Newline, Node::Done]);
            b.container_mut(root).contents = vec![
                Node::TunnelCall {
                    dest: Address::from("t"),
                },
                text("skipped"),
                Node::Done,
            ];
        });
        let (output, _, _) = run(&story);
        assert_eq!(output, "after!\n");
    }

    #[test]
    fn test_end_unwinds_and_discards_choices() {
        let story = build(|b, root| {
            let main = b.reserve(Some(root), Some(0));
            b.container_mut(main).contents = vec![
                Node::BeginEval,
                Node::BeginStringEval,
                text("x"),
                Node::EndStringEval,
                Node::EndEval,
                Node::ChoicePoint {
                    dest: Address::from("0.c-0"),
                    flags: choice_flags(ChoiceFlags::HAS_CHOICE_ONLY_CONTENT),
                },
                text("tail"),
                Node::Newline,
                Node::End,
            ];
            nested(b, main, "c-0", vec![text("never"), Node::Done]);
            b.container_mut(root).contents = vec![Node::Container(main), Node::Done];
        });
        let (output, choices, eval) = run(&story);
        assert_eq!(output, "tail\n");
        assert!(choices.is_empty());
        assert!(eval.is_finished());
    }

    #[test]
    fn test_visit_counters() {
        let story = build(|b, root| {
            let k = b.reserve(Some(root), Some(0));
            b.container_mut(k).name = Some("k".to_string());
            b.container_mut(k).flags = ContainerFlags(ContainerFlags::RECORD_VISITS);
            b.container_mut(k).contents = vec![
                Node::BeginEval,
                Node::GetVisitCount {
                    container: "k".to_string(),
                },
                Node::Out,
                Node::EndEval,
                text(" "),
                Node::BeginEval,
                Node::VisitIndex,
                Node::Out,
                Node::EndEval,
                text(" "),
                Node::BeginEval,
                Node::divert_target("k"),
                Node::ReadCount,
                Node::Out,
                Node::EndEval,
                Node::Newline,
                Node::Done,
            ];
            b.container_mut(root).contents = vec![Node::Container(k), Node::Done];
        });
        let (output, _, _) = run(&story);
        assert_eq!(output, "1 0 1\n");
    }

    #[test]
    fn test_visit_count_of_nested_container() {
        // A stitch two levels deep must be countable by its dotted path and
        // by a relative reference, both resolved through the tree.
        let story = build(|b, root| {
            let k = b.reserve(Some(root), Some(0));
            b.container_mut(k).name = Some("k".to_string());
            b.container_mut(k).flags = ContainerFlags(ContainerFlags::RECORD_VISITS);
            let s = nested(
                b,
                k,
                "s",
                vec![
                    Node::BeginEval,
                    Node::GetVisitCount {
                        container: "k.s".to_string(),
                    },
                    Node::Out,
                    Node::EndEval,
                    text(" "),
                    Node::BeginEval,
                    Node::GetVisitCount {
                        container: ".^.^.s".to_string(),
                    },
                    Node::Out,
                    Node::EndEval,
                    Node::Newline,
                    Node::Done,
                ],
            );
            b.container_mut(s).flags = ContainerFlags(ContainerFlags::RECORD_VISITS);
            b.container_mut(k).contents = vec![Node::Divert {
                dest: Address::from("k.s"),
                var: false,
                conditional: false,
            }];
            b.container_mut(root).contents = vec![Node::Container(k), Node::Done];
        });
        let (output, _, _) = run(&story);
        assert_eq!(output, "1 1\n");
    }

    #[test]
    fn test_turn_counter_after_choice() {
        let story = build(|b, root| {
            let main = b.reserve(Some(root), Some(0));
            b.container_mut(main).contents = vec![
                Node::BeginEval,
                Node::BeginStringEval,
                text("go"),
                Node::EndStringEval,
                Node::EndEval,
                Node::ChoicePoint {
                    dest: Address::from("0.c-0"),
                    flags: choice_flags(ChoiceFlags::HAS_CHOICE_ONLY_CONTENT),
                },
                Node::Done,
            ];
            nested(
                b,
                main,
                "c-0",
                vec![
                    Node::BeginEval,
                    Node::TurnCounter,
                    Node::Out,
                    Node::EndEval,
                    Node::Newline,
                    Node::Done,
                ],
            );
            b.container_mut(root).contents = vec![Node::Container(main), Node::Done];
        });
        let (_, choices, mut eval) = run(&story);
        let (output, _) = resume(&mut eval, &choices[0]);
        assert_eq!(output, "1\n");
    }

    #[test]
    fn test_divert_through_variable() {
        let story = build(|b, root| {
            nested(b, root, "dest", vec![text("jumped"), Node::Newline, Node::Done]);
            b.container_mut(root).contents = vec![
                Node::BeginEval,
                Node::divert_target("dest"),
                Node::SetVar {
                    name: "target".to_string(),
                    reassign: false,
                },
                Node::EndEval,
                Node::Divert {
                    dest: Address::from("target"),
                    var: true,
                    conditional: false,
                },
                text("skipped"),
                Node::Done,
            ];
        });
        let (output, _, _) = run(&story);
        assert_eq!(output, "jumped\n");
    }

    #[test]
    fn test_conditional_divert_falls_through() {
        let story = build(|b, root| {
            nested(b, root, "dest", vec![text("jumped"), Node::Done]);
            b.container_mut(root).contents = vec![
                Node::BeginEval,
                Node::int(0),
                Node::EndEval,
                Node::Divert {
                    dest: Address::from("dest"),
                    var: false,
                    conditional: true,
                },
                text("stayed"),
                Node::Newline,
                Node::Done,
            ];
        });
        let (output, _, _) = run(&story);
        assert_eq!(output, "stayed\n");
    }

    #[test]
    fn test_list_min_of_all_prints_first_item() {
        let mut origins = IndexMap::new();
        let mut l = IndexMap::new();
        l.insert("a".to_string(), 1);
        l.insert("b".to_string(), 2);
        origins.insert("L".to_string(), l);
        let story = build_with_defs(ListDefs::new(origins), |b, root| {
            b.container_mut(root).contents = vec![
                Node::BeginEval,
                text("L"),
                Node::int(2),
                Node::ListInt,
                Node::ListAll,
                Node::ListMin,
                Node::Out,
                Node::EndEval,
                Node::Newline,
                Node::Done,
            ];
        });
        let (output, _, _) = run(&story);
        assert_eq!(output, "a\n");
    }

    #[test]
    fn test_tag_content_discarded() {
        let story = build(|b, root| {
            b.container_mut(root).contents = vec![
                text("visible"),
                Node::BeginTag,
                text("a tag"),
                Node::EndTag,
                Node::Newline,
                Node::Done,
            ];
        });
        let (output, _, _) = run(&story);
        assert_eq!(output, "visible\n");
    }

    fn run_err(story: &Rc<Story>) -> Error {
        let mut eval = Evaluator::new(story.clone(), 42).unwrap();
        let mut w = GlueWriter::new();
        eval.continue_story(&mut w).unwrap_err()
    }

    #[test]
    fn test_unknown_variable_is_fatal() {
        let story = build(|b, root| {
            b.container_mut(root).contents = vec![
                Node::BeginEval,
                Node::GetVar {
                    name: "nope".to_string(),
                },
                Node::EndEval,
                Node::Done,
            ];
        });
        assert!(matches!(run_err(&story), Error::VariableNotFound(n) if n == "nope"));
    }

    #[test]
    fn test_pop_on_empty_stack_is_fatal() {
        let story = build(|b, root| {
            b.container_mut(root).contents = vec![Node::Pop, Node::Done];
        });
        assert!(matches!(run_err(&story), Error::StackUnderflow));
    }

    #[test]
    fn test_function_return_outside_function_is_fatal() {
        let story = build(|b, root| {
            b.container_mut(root).contents = vec![Node::FuncReturn];
        });
        assert!(matches!(run_err(&story), Error::ReturnOutsideFunction));
    }

    #[test]
    fn test_tunnel_return_without_tunnel_is_fatal() {
        let story = build(|b, root| {
            b.container_mut(root).contents = vec![
                Node::BeginEval,
                Node::Void,
                Node::EndEval,
                Node::TunnelReturn,
            ];
        });
        assert!(matches!(run_err(&story), Error::TunnelReturnOutsideTunnel));
    }

    #[test]
    fn test_missing_divert_target_is_fatal() {
        let story = build(|b, root| {
            b.container_mut(root).contents = vec![Node::Divert {
                dest: Address::from("missing"),
                var: false,
                conditional: false,
            }];
        });
        assert!(matches!(run_err(&story), Error::ContainerNotFound(_)));
    }

    #[test]
    fn test_glue_across_newlines() {
        let story = build(|b, root| {
            b.container_mut(root).contents = vec![
                text("A"),
                Node::Newline,
                Node::Glue,
                Node::Newline,
                text("B"),
                Node::Newline,
                Node::Done,
            ];
        });
        let (output, _, _) = run(&story);
        assert_eq!(output, "AB\n");
    }
}
