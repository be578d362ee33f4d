//! Scripted wallet used by unit tests

use crate::error::{RelayerError, RelayerResult};
use crate::wallet::{BatchApi, WalletEvent, WalletProvider};

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

pub const ACCOUNT: &str = "0x1111111111111111111111111111111111111111";
pub const RECIPIENT: &str = "0x3333333333333333333333333333333333333333";

#[derive(Clone)]
enum Scripted {
    Ok(Value),
    Err(String),
}

/// Wallet answering each method from a queue; the last queued answer repeats.
pub struct ScriptedWallet {
    responses: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: Mutex<Vec<(String, Value)>>,
    events: broadcast::Sender<WalletEvent>,
    batch_api: Option<Arc<dyn BatchApi>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedWallet {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            responses: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            events,
            batch_api: None,
            delay: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_batch_api(mut self, api: Arc<dyn BatchApi>) -> Self {
        self.batch_api = Some(api);
        self
    }

    /// Delay every response, simulating a slow wallet
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn respond(&self, method: &str, value: Value) {
        self.push(method, Scripted::Ok(value));
    }

    pub fn fail(&self, method: &str, message: &str) {
        self.push(method, Scripted::Err(message.to_string()));
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .count()
    }

    pub fn params_of(&self, method: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, params)| params.clone())
            .collect()
    }

    /// Highest number of requests observed running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn emit(&self, event: WalletEvent) {
        let _ = self.events.send(event);
    }

    fn push(&self, method: &str, scripted: Scripted) {
        self.responses
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(scripted);
    }

    fn next(&self, method: &str) -> Option<Scripted> {
        let mut responses = self.responses.lock().unwrap();
        let queue = responses.get_mut(method)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl WalletProvider for ScriptedWallet {
    async fn request(&self, method: &str, params: Value) -> RelayerResult<Value> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), params));

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.next(method) {
            Some(Scripted::Ok(value)) => Ok(value),
            Some(Scripted::Err(message)) => Err(RelayerError::Rpc {
                method: method.to_string(),
                message,
            }),
            None => Err(RelayerError::Rpc {
                method: method.to_string(),
                message: "method not scripted".to_string(),
            }),
        }
    }

    fn batch_api(&self) -> Option<Arc<dyn BatchApi>> {
        self.batch_api.clone()
    }

    fn subscribe_events(&self) -> Option<broadcast::Receiver<WalletEvent>> {
        Some(self.events.subscribe())
    }
}
