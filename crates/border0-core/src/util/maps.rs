use std::collections::HashMap;
use std::hash::Hash;

/// Swap keys and values. When values repeat, one of the keys wins.
pub fn reverse_map<K, V>(map: &HashMap<K, V>) -> HashMap<V, K>
where
    K: Clone,
    V: Clone + Eq + Hash,
{
    map.iter().map(|(k, v)| (v.clone(), k.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_reverse_is_identity_for_unique_values() {
        let map: HashMap<&str, &str> = [("http", "80"), ("ssh", "22"), ("tls", "443")]
            .into_iter()
            .collect();
        assert_eq!(reverse_map(&reverse_map(&map)), map);
    }

    #[test]
    fn duplicate_values_collapse() {
        let map: HashMap<u8, &str> = [(1, "x"), (2, "x")].into_iter().collect();
        assert_eq!(reverse_map(&map).len(), 1);
    }
}
