//! In-memory upstream transport for session tests.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;

use crate::address::HostPort;
use crate::error::{Result, TunnelError};
use crate::shell::{UpstreamConnector, UpstreamIo};

#[derive(Debug, Default)]
pub(crate) struct MockState {
    /// Every call to `open`, including refused ones.
    pub open_attempts: usize,
    pub opens: usize,
    pub closes: usize,
    pub opened_addrs: Vec<HostPort>,
    pub written: Vec<u8>,
    pub write_attempts: usize,
    pub fail_open: bool,
    pub fail_writes: bool,
    pub incoming: VecDeque<Bytes>,
    pub eof: bool,
}

/// Connector whose streams all share one [`MockState`].
#[derive(Debug, Clone, Default)]
pub(crate) struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }
}

impl UpstreamConnector for MockConnector {
    async fn open(&self, addr: &HostPort) -> Result<Box<dyn UpstreamIo>> {
        let mut state = self.state();
        state.open_attempts += 1;
        if state.fail_open {
            return Err(TunnelError::connect(addr.to_string(), "refused by mock"));
        }
        state.opens += 1;
        state.opened_addrs.push(addr.clone());
        Ok(Box::new(MockIo {
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockIo {
    state: Arc<Mutex<MockState>>,
}

impl UpstreamIo for MockIo {
    fn try_read_line(&mut self) -> io::Result<Option<Bytes>> {
        let mut state = self.state.lock().unwrap();
        match state.incoming.pop_front() {
            Some(line) => Ok(Some(line)),
            None if state.eof => Err(io::ErrorKind::UnexpectedEof.into()),
            None => Ok(None),
        }
    }

    fn try_write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        state.write_attempts += 1;
        if state.fail_writes {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        state.written.extend_from_slice(data);
        Ok(data.len())
    }

    fn close(&mut self) -> io::Result<()> {
        self.state.lock().unwrap().closes += 1;
        Ok(())
    }
}
