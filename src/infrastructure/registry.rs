use dashmap::DashMap;
use log::info;
use std::sync::Arc;

/// Hands out one transport per broker endpoint set.
///
/// Endpoint lists are compared after trimming, sorting and de-duplicating, so
/// `"b:9092,a:9092"` and `"a:9092, b:9092"` share a connection.
pub struct TransportRegistry<T: ?Sized> {
    transports: DashMap<Vec<String>, Arc<T>>,
}

impl<T: ?Sized> TransportRegistry<T> {
    pub fn new() -> Self {
        Self {
            transports: DashMap::new(),
        }
    }

    /// Return the transport for `endpoints`, building it with `connect` on first use
    pub fn get_or_connect<F>(&self, endpoints: &[String], connect: F) -> Arc<T>
    where
        F: FnOnce(&[String]) -> Arc<T>,
    {
        let key = normalize(endpoints);
        self.transports
            .entry(key.clone())
            .or_insert_with(|| {
                info!("Connecting transport for [{}]", key.join(", "));
                connect(&key)
            })
            .value()
            .clone()
    }

    pub fn len(&self) -> usize {
        self.transports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
    }
}

impl<T: ?Sized> Default for TransportRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(endpoints: &[String]) -> Vec<String> {
    let mut key: Vec<String> = endpoints
        .iter()
        .map(|e| e.trim().to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .collect();
    key.sort();
    key.dedup();
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn same_endpoint_set_shares_one_transport() {
        let registry: TransportRegistry<String> = TransportRegistry::new();
        let connects = AtomicUsize::new(0);
        let connect = |key: &[String]| {
            connects.fetch_add(1, Ordering::SeqCst);
            Arc::new(key.join(","))
        };

        let a = registry.get_or_connect(&["b:9092".into(), "a:9092".into()], connect);
        let b = registry.get_or_connect(&[" a:9092".into(), "b:9092".into(), "a:9092".into()], connect);

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(connects.load(Ordering::SeqCst), 1);
        assert_eq!(a.as_str(), "a:9092,b:9092");
    }

    #[test]
    fn different_endpoint_sets_get_separate_transports() {
        let registry: TransportRegistry<String> = TransportRegistry::new();
        let a = registry.get_or_connect(&["a:9092".into()], |k| Arc::new(k.join(",")));
        let b = registry.get_or_connect(&["b:9092".into()], |k| Arc::new(k.join(",")));
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 2);
    }
}
