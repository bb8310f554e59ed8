//! In-memory broker for exercising the publisher without RabbitMQ.
//!
//! Counts open connections and channels, records published messages, and can
//! be told to fail or hang at any step.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use super::broker::{Broker, BrokerChannel, BrokerConnection, Closeable};
use super::types::QueueSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    Connect,
    ConnectHang,
    Channel,
    ChannelHang,
    Declare,
    DeclareHang,
    Publish,
    PublishHang,
    /// Channel and connection closes never complete.
    CloseHang,
}

#[derive(Debug, Clone)]
pub struct FakeMessage {
    pub queue: String,
    pub body: Vec<u8>,
    pub content_type: String,
}

#[derive(Default)]
struct State {
    faults: HashSet<Fault>,
    generation: u64,
    connects: usize,
    declares: usize,
    open_connections: usize,
    open_channels: usize,
    queues: HashMap<String, bool>,
    messages: Vec<FakeMessage>,
}

#[derive(Clone, Default)]
pub struct FakeBroker {
    state: Arc<Mutex<State>>,
}

impl FakeBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn inject(&self, fault: Fault) {
        self.lock().faults.insert(fault);
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    /// Simulate the broker dropping every client connection.
    pub fn sever_connections(&self) {
        let mut state = self.lock();
        state.generation += 1;
        state.open_connections = 0;
        state.open_channels = 0;
    }

    pub fn messages(&self) -> Vec<FakeMessage> {
        self.lock().messages.clone()
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    pub fn declares(&self) -> usize {
        self.lock().declares
    }

    pub fn open_connections(&self) -> usize {
        self.lock().open_connections
    }

    pub fn open_channels(&self) -> usize {
        self.lock().open_channels
    }

    /// Let background release tasks run.
    pub async fn settle(&self) {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }
}

fn has_fault(state: &Arc<Mutex<State>>, fault: Fault) -> bool {
    state.lock().unwrap().faults.contains(&fault)
}

#[async_trait]
impl Broker for FakeBroker {
    type Connection = FakeConnection;

    async fn connect(&self, _url: &str) -> Result<FakeConnection> {
        if has_fault(&self.state, Fault::ConnectHang) {
            std::future::pending::<()>().await;
        }

        let mut state = self.lock();
        if state.faults.contains(&Fault::Connect) {
            bail!("connection refused");
        }
        state.connects += 1;
        state.open_connections += 1;

        Ok(FakeConnection {
            state: Arc::clone(&self.state),
            generation: state.generation,
            closed: AtomicBool::new(false),
        })
    }
}

pub struct FakeConnection {
    state: Arc<Mutex<State>>,
    generation: u64,
    closed: AtomicBool,
}

#[async_trait]
impl Closeable for FakeConnection {
    async fn close(&self) -> Result<()> {
        if has_fault(&self.state, Fault::CloseHang) {
            std::future::pending::<()>().await;
        }
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut state = self.state.lock().unwrap();
        if state.generation == self.generation {
            state.open_connections -= 1;
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerConnection for FakeConnection {
    type Channel = FakeChannel;

    async fn open_channel(&self) -> Result<FakeChannel> {
        if has_fault(&self.state, Fault::ChannelHang) {
            std::future::pending::<()>().await;
        }
        if !self.is_connected() {
            bail!("connection closed");
        }

        let mut state = self.state.lock().unwrap();
        if state.faults.contains(&Fault::Channel) {
            bail!("channel limit reached");
        }
        state.open_channels += 1;

        Ok(FakeChannel {
            state: Arc::clone(&self.state),
            generation: self.generation,
            closed: AtomicBool::new(false),
        })
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
            && self.state.lock().unwrap().generation == self.generation
    }
}

pub struct FakeChannel {
    state: Arc<Mutex<State>>,
    generation: u64,
    closed: AtomicBool,
}

#[async_trait]
impl Closeable for FakeChannel {
    async fn close(&self) -> Result<()> {
        if has_fault(&self.state, Fault::CloseHang) {
            std::future::pending::<()>().await;
        }
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut state = self.state.lock().unwrap();
        if state.generation == self.generation {
            state.open_channels -= 1;
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerChannel for FakeChannel {
    async fn declare_queue(&self, settings: &QueueSettings) -> Result<()> {
        if has_fault(&self.state, Fault::DeclareHang) {
            std::future::pending::<()>().await;
        }
        let mut state = self.state.lock().unwrap();
        if state.faults.contains(&Fault::Declare) {
            bail!("access refused");
        }
        state.declares += 1;

        match state.queues.get(&settings.name) {
            Some(&durable) if durable != settings.durable => Err(anyhow!(
                "PRECONDITION_FAILED - inequivalent arg 'durable' for queue '{}'",
                settings.name
            )),
            Some(_) => Ok(()),
            None => {
                state.queues.insert(settings.name.clone(), settings.durable);
                Ok(())
            }
        }
    }

    async fn publish(&self, queue: &str, payload: &[u8], content_type: &str) -> Result<()> {
        if has_fault(&self.state, Fault::PublishHang) {
            std::future::pending::<()>().await;
        }

        let mut state = self.state.lock().unwrap();
        if state.faults.contains(&Fault::Publish) {
            bail!("channel closed by broker");
        }
        state.messages.push(FakeMessage {
            queue: queue.to_string(),
            body: payload.to_vec(),
            content_type: content_type.to_string(),
        });
        Ok(())
    }
}
