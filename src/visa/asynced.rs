//! Async handle to the single blocking VISA session. The session lives on
//! its own OS thread and processes one request at a time from a channel,
//! so all access to it is serialized no matter how many handles exist.

use std::thread;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::bridge::InstrumentIo;
use crate::visa::{Instrument as BlockingInstrument, VisaReply, VisaRequest, VisaResult};
use crate::Error;

struct Thread {
    instr: BlockingInstrument,
    rx: mpsc::UnboundedReceiver<Msg>,
}

#[derive(Clone)]
pub struct Instrument {
    tx: mpsc::UnboundedSender<Msg>,
}

enum Msg {
    Request {
        request: VisaRequest,
        reply: oneshot::Sender<VisaResult<VisaReply>>,
    },
    Drop,
}

impl Instrument {
    pub fn spawn(instr: BlockingInstrument) -> Instrument {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut thread = Thread { instr, rx };
        thread::spawn(move || {
            while let Some(msg) = thread.rx.blocking_recv() {
                if !thread.handle_msg(msg) {
                    return;
                }
            }
        });

        Instrument { tx }
    }

    async fn handle(&self, request: VisaRequest) -> crate::Result<VisaReply> {
        let (tx, rx) = oneshot::channel();
        let msg = Msg::Request { request, reply: tx };
        self.tx.send(msg).map_err(|_| Error::Disconnected)?;
        let ret: VisaResult<VisaReply> = rx.await.map_err(|_| Error::Disconnected)?;
        ret.map_err(Error::Visa)
    }

    pub fn disconnect(self) {
        let _ = self.tx.send(Msg::Drop);
    }
}

impl Thread {
    fn handle_msg(&mut self, msg: Msg) -> bool {
        match msg {
            Msg::Request { request, reply } => {
                let _ = reply.send(self.instr.handle(request));
                true
            }
            Msg::Drop => false,
        }
    }
}

#[async_trait]
impl InstrumentIo for Instrument {
    async fn write(&self, data: &[u8]) -> crate::Result<()> {
        match self.handle(VisaRequest::Write(data.to_vec())).await? {
            VisaReply::Written => Ok(()),
            _ => panic!("Invalid reply. This is a bug"),
        }
    }

    async fn read(&self, max_len: usize) -> crate::Result<Vec<u8>> {
        match self.handle(VisaRequest::Read(max_len)).await? {
            VisaReply::Bytes(data) => Ok(data),
            _ => panic!("Invalid reply. This is a bug"),
        }
    }
}
