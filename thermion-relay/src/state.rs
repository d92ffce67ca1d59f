use parking_lot::Mutex;
use std::sync::Arc;

/// Alias pour l'état partagé entre tâches tokio.
pub type Shared<T> = Arc<Mutex<T>>;

pub fn shared<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}
