use crate::error::CallError;
use crate::transport::Rendezvous;
use log::{error, info};
use tokio::sync::{watch, Mutex};

/// Держит идентификатор этого узла. Значение назначается один раз и больше не меняется
pub struct IdentityService {
    tx: watch::Sender<Option<String>>,
    // сериализует initialize: к транспорту обращаемся ровно один раз
    init: Mutex<Option<Result<String, CallError>>>,
}

impl Default for IdentityService {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityService {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            tx,
            init: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.tx.subscribe()
    }

    pub fn local_id(&self) -> Option<String> {
        self.tx.borrow().clone()
    }

    /// Запрашивает id у транспорта. Повторные вызовы возвращают первый результат
    pub async fn initialize(&self, transport: &dyn Rendezvous) -> Result<String, CallError> {
        let mut init = self.init.lock().await;
        if let Some(result) = init.as_ref() {
            return result.clone();
        }

        let result = match transport.open().await {
            Ok(id) if id.is_empty() => Err(CallError::Initialization(
                "rendezvous assigned an empty identifier".into(),
            )),
            Ok(id) => {
                info!("My peer ID is: {}", id);
                self.tx.send_if_modified(|current| {
                    if current.is_none() {
                        *current = Some(id.clone());
                        true
                    } else {
                        false
                    }
                });
                Ok(id)
            }
            Err(e) => Err(CallError::Initialization(e.to_string())),
        };

        if let Err(e) = &result {
            error!("Failed to initialize networking: {}", e);
        }
        *init = Some(result.clone());
        result
    }
}
