use std::collections::{HashMap, VecDeque};

const DEFAULT_CAPACITY: usize = 2048;

/// Bounded cache of embedding vectors, keyed by the exact text sent to the
/// embeddings API. Backtracking re-ranks the same summaries at every scope
/// it revisits, and both retrieval phases embed the query repeatedly, so
/// repeats dominate one retrieval's embedding traffic.
pub struct EmbeddingCache {
    entries: HashMap<String, Vec<f32>>,
    /// Recency queue over the keys in `entries`, stalest at the front.
    order: VecDeque<String>,
    capacity: usize,
}

impl EmbeddingCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&mut self, text: &str) -> Option<Vec<f32>> {
        let vector = self.entries.get(text)?.clone();
        self.touch(text);
        Some(vector)
    }

    pub fn put(&mut self, text: String, vector: Vec<f32>) {
        if self.entries.insert(text.clone(), vector).is_some() {
            self.touch(&text);
            return;
        }

        self.order.push_back(text);
        if self.entries.len() > self.capacity {
            if let Some(stale) = self.order.pop_front() {
                self.entries.remove(&stale);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Move `text` to the back of the recency queue.
    fn touch(&mut self, text: &str) {
        if let Some(pos) = self.order.iter().position(|key| key == text) {
            if let Some(key) = self.order.remove(pos) {
                self.order.push_back(key);
            }
        }
    }
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeat_lookup_hits() {
        let mut cache = EmbeddingCache::new();
        assert!(cache.get("removes the top element").is_none());

        cache.put("removes the top element".to_string(), vec![0.1, 0.2]);
        assert_eq!(
            cache.get("removes the top element"),
            Some(vec![0.1, 0.2])
        );
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_stalest_text_is_evicted() {
        // A backtracking pass re-reads the query between scope rankings,
        // so the untouched summary is the one that must fall out.
        let mut cache = EmbeddingCache::with_capacity(2);
        cache.put("remove the top element".to_string(), vec![0.9, 0.1]);
        cache.put("adds an element on top".to_string(), vec![0.2, 0.8]);

        cache.get("remove the top element");
        cache.put("program entry point".to_string(), vec![0.5, 0.5]);

        assert!(cache.get("remove the top element").is_some());
        assert!(cache.get("adds an element on top").is_none());
        assert!(cache.get("program entry point").is_some());
    }

    #[test]
    fn test_rewriting_a_key_does_not_evict() {
        let mut cache = EmbeddingCache::with_capacity(2);
        cache.put("a LIFO stack".to_string(), vec![1.0]);
        cache.put("entry point class".to_string(), vec![2.0]);
        cache.put("a LIFO stack".to_string(), vec![3.0]);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a LIFO stack"), Some(vec![3.0]));
        assert!(cache.get("entry point class").is_some());
    }

    #[test]
    fn test_capacity_holds_under_churn() {
        let mut cache = EmbeddingCache::with_capacity(3);
        for i in 0..10 {
            cache.put(format!("summary {i}"), vec![i as f32]);
        }

        assert_eq!(cache.len(), 3);
        assert!(cache.get("summary 0").is_none());
        assert_eq!(cache.get("summary 9"), Some(vec![9.0]));
    }
}
