//! End-to-end check of spec §8 S3: a linear pipe receives flow-def
//! "block.a.", transforms it to "block.b.", then `set_output` swaps its
//! downstream. The new downstream must receive "block.b." before any data
//! uref.

use std::sync::Arc;

use parking_lot::Mutex;
use upipe_core::refcount::Refcount;
use upipe_core::uref::Uref;
use upipe_pipe::helpers::flow_def::FlowDefHelper;
use upipe_pipe::helpers::output::OutputHelper;
use upipe_pipe::{ControlAnswer, ControlCommand, Pipe, PipeError, PipeResult, PumpSource};

/// A linear pipe that rewrites "block.a." flow-defs to "block.b." and
/// otherwise passes data through unchanged.
#[derive(Debug)]
struct RewritingLinear {
    refcount: Refcount,
    flow_def: FlowDefHelper,
    output: OutputHelper,
}

impl RewritingLinear {
    fn new() -> Arc<Self> {
        Arc::new(Self { refcount: Refcount::new(), flow_def: FlowDefHelper::new(), output: OutputHelper::new() })
    }
}

impl Pipe for RewritingLinear {
    fn refcount(&self) -> &Refcount {
        &self.refcount
    }

    fn input(&self, uref: Uref, pump_source: Option<PumpSource>) {
        if uref.is_flow_def() {
            let input = uref.flow_def_attr().map(|s| s.to_string()).unwrap_or_default();
            let rewritten = input.replace("block.a.", "block.b.");
            let out = self.flow_def.set_input_flow_def(uref, move |_input, _attr| Uref::flow_def(rewritten.clone()));
            self.output.store_flow_def(out);
        } else {
            self.output.forward(uref, pump_source);
        }
    }

    fn control(&self, command: ControlCommand) -> PipeResult {
        match command {
            ControlCommand::SetOutput(output) => {
                self.output.set_output(Some(output));
                Ok(ControlAnswer::None)
            }
            ControlCommand::GetFlowDef => self
                .flow_def
                .output_flow_def()
                .map(ControlAnswer::FlowDef)
                .ok_or(PipeError::Invalid("no flow-def negotiated yet".into())),
            _ => Err(PipeError::Unhandled),
        }
    }
}

#[derive(Debug, Default)]
struct RecordingSink {
    refcount: Refcount,
    received: Mutex<Vec<Uref>>,
}

impl Pipe for RecordingSink {
    fn refcount(&self) -> &Refcount {
        &self.refcount
    }
    fn input(&self, uref: Uref, _pump_source: Option<PumpSource>) {
        self.received.lock().push(uref);
    }
    fn control(&self, _command: ControlCommand) -> PipeResult {
        Err(PipeError::Unhandled)
    }
}

#[test]
fn scenario_s3_new_downstream_sees_rewritten_flow_def_before_data() {
    let linear = RewritingLinear::new();

    let first_sink = Arc::new(RecordingSink::default());
    linear.control(ControlCommand::SetOutput(first_sink.clone())).unwrap();

    linear.input(Uref::flow_def("block.a."), None);
    match linear.control(ControlCommand::GetFlowDef).unwrap() {
        ControlAnswer::FlowDef(def) => assert_eq!(def.flow_def_attr().as_deref(), Some("block.b.")),
        other => panic!("unexpected {other:?}"),
    }
    assert!(first_sink.received.lock()[0].is_flow_def());

    // set-output swaps the downstream; the new one must see "block.b."
    // before any data uref, even though the flow-def negotiation already
    // happened against the old downstream.
    let second_sink = Arc::new(RecordingSink::default());
    linear.control(ControlCommand::SetOutput(second_sink.clone())).unwrap();
    linear.input(Uref::new(), None);

    let received = second_sink.received.lock();
    assert_eq!(received.len(), 2);
    assert!(received[0].is_flow_def());
    assert_eq!(received[0].flow_def_attr().as_deref(), Some("block.b."));
    assert!(!received[1].is_flow_def());
}
