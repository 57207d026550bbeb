//! End-to-end check that a source feeding a sink through an output helper
//! delivers urefs in order with their exact payload bytes intact,
//! including an empty payload.

use std::sync::Arc;

use parking_lot::Mutex;
use upipe_core::refcount::Refcount;
use upipe_core::ubuf::{BlockUbuf, Range, Ubuf};
use upipe_core::umem::MallocUMemManager;
use upipe_core::uref::Uref;
use upipe_pipe::helpers::output::OutputHelper;
use upipe_pipe::{ControlAnswer, ControlCommand, Pipe, PipeError, PipeResult, PumpSource};

fn block_uref(bytes: &[u8]) -> Uref {
    let mgr = MallocUMemManager::new();
    let mut block = BlockUbuf::alloc(mgr, bytes.len()).unwrap();
    if !bytes.is_empty() {
        let w = block.map_write(Range::all()).unwrap();
        w.copy_from_slice(bytes);
        block.unmap_write().unwrap();
    }
    let mut uref = Uref::new();
    uref.set_ubuf(Ubuf::Block(block));
    uref
}

#[derive(Debug)]
struct Source {
    refcount: Refcount,
    output: OutputHelper,
}

impl Source {
    fn new() -> Arc<Self> {
        Arc::new(Self { refcount: Refcount::new(), output: OutputHelper::new() })
    }

    fn emit(&self, uref: Uref) {
        if let Some(output) = self.output.output() {
            output.input(uref, None);
        }
    }
}

impl Pipe for Source {
    fn refcount(&self) -> &Refcount {
        &self.refcount
    }
    fn input(&self, _uref: Uref, _pump_source: Option<PumpSource>) {}
    fn control(&self, command: ControlCommand) -> PipeResult {
        match command {
            ControlCommand::SetOutput(output) => {
                self.output.set_output(Some(output));
                Ok(ControlAnswer::None)
            }
            _ => Err(PipeError::Unhandled),
        }
    }
}

#[derive(Debug, Default)]
struct RecordingSink {
    refcount: Refcount,
    received: Mutex<Vec<Vec<u8>>>,
}

impl Pipe for RecordingSink {
    fn refcount(&self) -> &Refcount {
        &self.refcount
    }
    fn input(&self, mut uref: Uref, _pump_source: Option<PumpSource>) {
        let bytes = match uref.take_ubuf() {
            Some(Ubuf::Block(block)) => block.to_contiguous_vec(),
            _ => Vec::new(),
        };
        self.received.lock().push(bytes);
    }
    fn control(&self, _command: ControlCommand) -> PipeResult {
        Err(PipeError::Unhandled)
    }
}

#[test]
fn three_urefs_arrive_in_order_with_exact_bytes() {
    let source = Source::new();
    let sink = Arc::new(RecordingSink::default());
    source.control(ControlCommand::SetOutput(sink.clone())).unwrap();

    source.emit(block_uref(&[0x01]));
    source.emit(block_uref(&[0x02, 0x03]));
    source.emit(block_uref(&[]));

    let received = sink.received.lock();
    assert_eq!(*received, vec![vec![0x01], vec![0x02, 0x03], Vec::<u8>::new()]);
}
