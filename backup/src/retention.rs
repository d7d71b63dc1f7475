use log::{info, warn};
use storage::DestinationSink;

use crate::artifact::Namespace;
use crate::BackupError;

/// Names beyond the `keep` lexicographically greatest ones.
pub fn surplus(mut names: Vec<String>, keep: usize) -> Vec<String> {
    names.sort_unstable_by(|a, b| b.cmp(a));
    names.into_iter().skip(keep).collect()
}

/// Deletes every artifact of `namespace` except the `keep` newest and
/// returns what was removed. Every deletion is attempted even if some fail.
pub async fn rotate(
    sink: &dyn DestinationSink,
    namespace: &Namespace,
    keep: usize,
) -> Result<Vec<String>, BackupError> {
    let prefix = namespace.prefix();
    let existing: Vec<String> = sink
        .list(prefix)
        .await
        .map_err(|e| BackupError::Rotation(format!("cannot list {prefix}*: {e}")))?
        .into_iter()
        .filter(|name| namespace.contains(name))
        .collect();

    let mut deleted = Vec::new();
    let mut failures = Vec::new();
    for name in surplus(existing, keep) {
        match sink.delete(&name).await {
            Ok(()) => {
                info!("Rotated out {name}");
                deleted.push(name);
            }
            Err(e) => {
                warn!("Failed to delete {name}: {e}");
                failures.push(format!("{name}: {e}"));
            }
        }
    }

    if failures.is_empty() {
        Ok(deleted)
    } else {
        Err(BackupError::Rotation(failures.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactKind;
    use crate::testing::FakeSink;

    fn archives() -> Namespace {
        Namespace::new(None, "site", ArtifactKind::Archive)
    }

    fn names(count: u32) -> Vec<String> {
        (1..=count)
            .map(|day| format!("site_202401{day:02}_000000.zip"))
            .collect()
    }

    #[test]
    fn test_surplus_keeps_greatest() {
        let mut shuffled = names(8);
        shuffled.reverse();
        shuffled.swap(1, 5);
        assert_eq!(
            surplus(shuffled, 5),
            vec![
                "site_20240103_000000.zip",
                "site_20240102_000000.zip",
                "site_20240101_000000.zip"
            ]
        );
    }

    #[test]
    fn test_surplus_with_fewer_than_keep() {
        assert!(surplus(names(3), 5).is_empty());
    }

    #[tokio::test]
    async fn test_rotate_leaves_exactly_keep() {
        let sink = FakeSink::default().with_existing(&names(8));
        sink.insert("other_20240101_000000.zip");

        let deleted = rotate(&sink, &archives(), 5).await.unwrap();

        assert_eq!(deleted.len(), 3);
        let remaining = sink.names();
        assert_eq!(remaining.len(), 6);
        assert!(remaining.contains(&"other_20240101_000000.zip".to_string()));
        assert!(!remaining.contains(&"site_20240103_000000.zip".to_string()));
        assert!(remaining.contains(&"site_20240104_000000.zip".to_string()));
    }

    #[tokio::test]
    async fn test_rotate_ignores_other_kinds_and_labels_sharing_the_prefix() {
        let sink = FakeSink::default().with_existing(&names(3));
        sink.insert("site_20230101_000000.sql");
        sink.insert("site_eu_20230101_000000.zip");
        sink.insert("site_notes.txt");

        let deleted = rotate(&sink, &archives(), 1).await.unwrap();

        assert_eq!(
            deleted,
            vec!["site_20240102_000000.zip", "site_20240101_000000.zip"]
        );
        let remaining = sink.names();
        assert!(remaining.contains(&"site_20230101_000000.sql".to_string()));
        assert!(remaining.contains(&"site_eu_20230101_000000.zip".to_string()));
        assert!(remaining.contains(&"site_notes.txt".to_string()));
    }

    #[tokio::test]
    async fn test_delete_failures_become_rotation_error() {
        let sink = FakeSink::default().with_existing(&names(3)).failing_deletes();
        let result = rotate(&sink, &archives(), 1).await;
        assert!(matches!(result, Err(BackupError::Rotation(_))));
        assert_eq!(sink.names().len(), 3);
    }
}
