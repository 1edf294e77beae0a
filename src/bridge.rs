//! The per-connection request/response cycle: read one line from the
//! client, forward it to the instrument and answer with the instrument's
//! reply, a fixed acknowledgment or an error text.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// Capacity of the bounded instrument read issued for queries.
pub const RESPONSE_BUFFER_SIZE: usize = 2048;

pub const COMMAND_ACK: &str = "Command sent";
pub const WRITE_ERROR_REPLY: &str = "ERROR: failed to write to instrument";
pub const READ_ERROR_REPLY: &str = "ERROR: failed to read from instrument";

/// Access to the shared instrument session, as seen from the bridge.
#[async_trait]
pub trait InstrumentIo: Send + Sync {
    async fn write(&self, data: &[u8]) -> crate::Result<()>;
    async fn read(&self, max_len: usize) -> crate::Result<Vec<u8>>;
}

/// A line is a query iff its last non-whitespace character is `?`.
pub fn is_query(line: &str) -> bool {
    line.trim_end().ends_with('?')
}

/// Serve a single request on `conn`. Never fails: every fault is either
/// answered with an error reply or, for connection-level faults, logged
/// and swallowed, so a bad request cannot take down the accept loop.
pub async fn serve_one<I, C>(instr: &I, conn: &mut C)
where
    I: InstrumentIo,
    C: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut line = String::new();
    {
        let mut reader = BufReader::new(&mut *conn);
        match reader.read_line(&mut line).await {
            Ok(0) => return,
            Ok(_) => {}
            Err(err) => {
                log::debug!("client went away before sending a request: {}", err);
                return;
            }
        }
    }
    // EOF in the middle of a line: nothing to answer.
    if !line.ends_with('\n') {
        return;
    }
    let command = line.trim_end_matches(|c| c == '\r' || c == '\n');
    if command.is_empty() {
        return;
    }
    log::debug!("--> {}", command);

    let reply: Vec<u8> = if let Err(err) = instr.write(format!("{}\n", command).as_bytes()).await {
        log::error!("instrument write failed: {}", err);
        WRITE_ERROR_REPLY.as_bytes().to_vec()
    } else if is_query(command) {
        match instr.read(RESPONSE_BUFFER_SIZE).await {
            Ok(data) => data,
            Err(err) => {
                log::error!("instrument read failed: {}", err);
                READ_ERROR_REPLY.as_bytes().to_vec()
            }
        }
    } else {
        COMMAND_ACK.as_bytes().to_vec()
    };

    log::debug!("<-- {}", String::from_utf8_lossy(&reply).trim_end());
    if let Err(err) = write_reply(conn, &reply).await {
        log::debug!("client went away before reading the reply: {}", err);
    }
}

async fn write_reply<C>(conn: &mut C, reply: &[u8]) -> std::io::Result<()>
where
    C: AsyncWrite + Unpin,
{
    conn.write_all(reply).await?;
    conn.write_all(b"\n").await?;
    conn.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::Mutex;
    use tokio::io::{duplex, AsyncReadExt};

    struct FakeInstrument {
        written: Mutex<Vec<Vec<u8>>>,
        reads: Mutex<usize>,
        read_data: Vec<u8>,
        fail_write: bool,
        fail_read: bool,
    }

    impl FakeInstrument {
        fn replying(read_data: &[u8]) -> Self {
            Self {
                written: Mutex::new(vec![]),
                reads: Mutex::new(0),
                read_data: read_data.to_vec(),
                fail_write: false,
                fail_read: false,
            }
        }

        fn written(&self) -> Vec<Vec<u8>> {
            self.written.lock().unwrap().clone()
        }

        fn reads(&self) -> usize {
            *self.reads.lock().unwrap()
        }
    }

    #[async_trait]
    impl InstrumentIo for FakeInstrument {
        async fn write(&self, data: &[u8]) -> crate::Result<()> {
            if self.fail_write {
                return Err(Error::Disconnected);
            }
            self.written.lock().unwrap().push(data.to_vec());
            Ok(())
        }

        async fn read(&self, max_len: usize) -> crate::Result<Vec<u8>> {
            *self.reads.lock().unwrap() += 1;
            if self.fail_read {
                return Err(Error::Disconnected);
            }
            let mut data = self.read_data.clone();
            data.truncate(max_len);
            Ok(data)
        }
    }

    async fn run_bridge(instr: &FakeInstrument, input: &[u8]) -> Vec<u8> {
        let (mut client, mut server) = duplex(4096);
        client.write_all(input).await.unwrap();
        client.shutdown().await.unwrap();
        serve_one(instr, &mut server).await;
        drop(server);
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        out
    }

    #[test]
    fn query_classification() {
        assert!(is_query("*IDN?"));
        assert!(is_query("MEAS:VOLT:DC?"));
        assert!(is_query("*IDN? "));
        assert!(!is_query("OUTPUT ON"));
        assert!(!is_query("?*IDN"));
        assert!(!is_query(""));
    }

    #[tokio::test]
    async fn query_relays_exactly_the_bytes_read() {
        let instr = FakeInstrument::replying(b"TEK,MSO54,C012345,1.0\n");
        let out = run_bridge(&instr, b"*IDN?\n").await;
        assert_eq!(out, b"TEK,MSO54,C012345,1.0\n\n".to_vec());
        assert_eq!(instr.written(), vec![b"*IDN?\n".to_vec()]);
        assert_eq!(instr.reads(), 1);
    }

    #[tokio::test]
    async fn command_is_acknowledged_without_read() {
        let instr = FakeInstrument::replying(b"unsolicited");
        let out = run_bridge(&instr, b"OUTPUT ON\n").await;
        assert_eq!(out, b"Command sent\n".to_vec());
        assert_eq!(instr.written(), vec![b"OUTPUT ON\n".to_vec()]);
        assert_eq!(instr.reads(), 0);
    }

    #[tokio::test]
    async fn crlf_is_stripped_before_forwarding() {
        let instr = FakeInstrument::replying(b"");
        let out = run_bridge(&instr, b"OUTPUT ON\r\n").await;
        assert_eq!(out, b"Command sent\n".to_vec());
        assert_eq!(instr.written(), vec![b"OUTPUT ON\n".to_vec()]);
    }

    #[tokio::test]
    async fn empty_line_produces_no_write_and_no_reply() {
        let instr = FakeInstrument::replying(b"");
        let out = run_bridge(&instr, b"\n").await;
        assert!(out.is_empty());
        assert!(instr.written().is_empty());
        assert_eq!(instr.reads(), 0);

        let out = run_bridge(&instr, b"\r\n").await;
        assert!(out.is_empty());
        assert!(instr.written().is_empty());
    }

    #[tokio::test]
    async fn eof_before_complete_line_is_ignored() {
        let instr = FakeInstrument::replying(b"");
        let out = run_bridge(&instr, b"*IDN?").await;
        assert!(out.is_empty());
        assert!(instr.written().is_empty());
    }

    #[tokio::test]
    async fn immediate_eof_is_ignored() {
        let instr = FakeInstrument::replying(b"");
        let out = run_bridge(&instr, b"").await;
        assert!(out.is_empty());
        assert!(instr.written().is_empty());
    }

    #[tokio::test]
    async fn write_failure_is_reported_and_no_read_attempted() {
        let mut instr = FakeInstrument::replying(b"whatever");
        instr.fail_write = true;
        let out = run_bridge(&instr, b"*IDN?\n").await;
        assert_eq!(out, b"ERROR: failed to write to instrument\n".to_vec());
        assert_eq!(instr.reads(), 0);
    }

    #[tokio::test]
    async fn read_failure_is_reported() {
        let mut instr = FakeInstrument::replying(b"whatever");
        instr.fail_read = true;
        let out = run_bridge(&instr, b"*IDN?\n").await;
        assert_eq!(out, b"ERROR: failed to read from instrument\n".to_vec());
        assert_eq!(instr.reads(), 1);
    }

    #[tokio::test]
    async fn short_instrument_reply_is_not_padded() {
        let instr = FakeInstrument::replying(b"42");
        let out = run_bridge(&instr, b"MEAS:VOLT:DC?\n").await;
        assert_eq!(out, b"42\n".to_vec());
    }

    #[tokio::test]
    async fn query_with_trailing_space_still_reads() {
        let instr = FakeInstrument::replying(b"ok");
        let out = run_bridge(&instr, b"MEAS? \n").await;
        assert_eq!(out, b"ok\n".to_vec());
        assert_eq!(instr.reads(), 1);
        assert_eq!(instr.written(), vec![b"MEAS? \n".to_vec()]);
    }
}
