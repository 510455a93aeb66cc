use crate::config::CollectorConfig;

/// Exclude wins over include; an empty include list admits every namespace
/// that is not excluded.
pub fn included(namespace: &str, cfg: &CollectorConfig) -> bool {
    if cfg.exclude_namespaces.iter().any(|ns| ns == namespace) {
        return false;
    }
    if cfg.include_namespaces.is_empty() {
        return true;
    }
    cfg.include_namespaces.iter().any(|ns| ns == namespace)
}
