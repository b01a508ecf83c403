use crate::catalog::Catalog;
use crate::layout::{column, FileKind};
use crate::store::{ImageRecord, StoreError};
use crate::validate::Tag;
use log::{info, warn};
use result::Result;
use serde::Serialize;
use std::path::Path;

/// What a reconciliation pass found.
#[derive(Serialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct Report {
    /// Records whose stored files exist beneath the data root.
    pub intact: usize,
    /// Records that were rewritten to point at the files of their tag.
    pub repaired: Vec<Anomaly>,
    /// Records for which no files could be found anywhere.
    pub broken: Vec<Anomaly>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Anomaly {
    pub id: i64,
    pub docker_tag: String,
    pub reason: String,
}

enum Verdict {
    Intact,
    Repaired(String),
    Broken(String),
    // Deleted while the pass was running.
    Gone,
}

/// Walks every record and brings its stored paths back in line with the filesystem.
///
/// * Stored files that exist beneath the data root are left alone.
/// * Otherwise, if both files exist at the paths derived from the record's tag, the record is
///   rewritten to point at them.
/// * Otherwise the tag's directory is created (so that it can be filled by hand) and the
///   record is reported as broken.
///
/// A tag that is not a safe directory name is reported as broken without touching the disk.
/// Running the pass again right away finds nothing new to repair and changes nothing.
pub async fn reconcile(catalog: &Catalog) -> Result<Report> {
    let mut report = Report::default();
    for listed in catalog.store.list().await? {
        let (record, verdict) = check(catalog, listed).await?;
        let anomaly = |reason| Anomaly {
            id: record.id,
            docker_tag: record.docker_tag.clone(),
            reason,
        };
        match verdict {
            Verdict::Intact => report.intact += 1,
            Verdict::Repaired(reason) => report.repaired.push(anomaly(reason)),
            Verdict::Broken(reason) => report.broken.push(anomaly(reason)),
            Verdict::Gone => {}
        }
    }
    for repaired in report.repaired.iter() {
        info!(
            "Repaired record {} ({}): {}",
            term_colors::tag(repaired.id),
            term_colors::tag(&repaired.docker_tag),
            repaired.reason
        );
    }
    for broken in report.broken.iter() {
        warn!(
            "{} record {} ({}): {}",
            term_colors::anomaly("Broken"),
            term_colors::tag(broken.id),
            term_colors::tag(&broken.docker_tag),
            broken.reason
        );
    }
    info!(
        "Reconciled the registry: {} intact, {} repaired, {} broken",
        report.intact,
        report.repaired.len(),
        report.broken.len()
    );
    Ok(report)
}

/// Judges one record under the lock of its tag. The listed row may be out of date by the time
/// the lock is held, so the row is read again and the lock chased until the tag stops moving.
async fn check(
    catalog: &Catalog,
    listed: ImageRecord,
) -> std::result::Result<(ImageRecord, Verdict), StoreError> {
    let mut record = listed;
    loop {
        let tag = match Tag::parse(&record.docker_tag) {
            Ok(tag) => tag,
            Err(_) => {
                let verdict = Verdict::Broken(String::from("the tag is not a safe directory name"));
                return Ok((record, verdict));
            }
        };
        let _guard = catalog.locks.lock(&tag).await;
        let current = match catalog.store.get(record.id).await {
            Ok(current) => current,
            Err(StoreError::NotFound { .. }) => return Ok((record, Verdict::Gone)),
            Err(err) => return Err(err),
        };
        if current.docker_tag != record.docker_tag {
            record = current;
            continue;
        }
        let verdict = judge(catalog, &tag, &current).await?;
        return Ok((current, verdict));
    }
}

async fn judge(
    catalog: &Catalog,
    tag: &Tag,
    record: &ImageRecord,
) -> std::result::Result<Verdict, StoreError> {
    if stored_files_exist(catalog, record).await {
        return Ok(Verdict::Intact);
    }
    if catalog.layout.complete(tag).await {
        let libc = column(&catalog.layout.file(tag, FileKind::Libc));
        let ld = column(&catalog.layout.file(tag, FileKind::Ld));
        return match catalog.store.update_paths(record.id, &libc, &ld).await {
            Ok(()) => Ok(Verdict::Repaired(format!(
                "moved from {} and {} to {}",
                record.libc,
                record.ld,
                catalog.layout.dir(tag).display()
            ))),
            Err(StoreError::NotFound { .. }) => Ok(Verdict::Gone),
            Err(err) => Err(err),
        };
    }
    let dir = catalog.layout.dir(tag);
    if let Err(err) = tokio::fs::create_dir_all(&dir).await {
        warn!(
            "Failed to create {} for a broken record: {}",
            term_colors::path(dir.display()),
            err
        );
    }
    Ok(Verdict::Broken(format!(
        "neither the stored files nor the files in {} exist",
        dir.display()
    )))
}

async fn stored_files_exist(catalog: &Catalog, record: &ImageRecord) -> bool {
    for stored in [&record.libc, &record.ld].iter() {
        match catalog.layout.resolve(Path::new(stored.as_str())).await {
            Ok(Some(_)) => {}
            _ => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;

    fn fill(catalog: &Catalog, tag: &str) -> Tag {
        let tag = Tag::parse(tag).unwrap();
        std::fs::create_dir_all(catalog.layout.dir(&tag)).unwrap();
        for kind in FileKind::ALL.iter() {
            std::fs::write(catalog.layout.file(&tag, *kind), kind.file_name()).unwrap();
        }
        tag
    }

    async fn register(catalog: &Catalog, tag: &Tag) -> i64 {
        catalog
            .store
            .insert(
                tag.as_str(),
                &column(&catalog.layout.file(tag, FileKind::Libc)),
                &column(&catalog.layout.file(tag, FileKind::Ld)),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn intact_records_are_left_alone() {
        let fixture = Fixture::new();
        let catalog = fixture.catalog().await;
        let tag = fill(&catalog, "22.04-latest");
        register(&catalog, &tag).await;
        let before = catalog.store.list().await.unwrap();
        let report = reconcile(&catalog).await.unwrap();
        assert_eq!(
            report,
            Report {
                intact: 1,
                ..Report::default()
            }
        );
        assert_eq!(catalog.store.list().await.unwrap(), before);
    }

    #[tokio::test]
    async fn half_renamed_records_are_repaired_once() {
        let fixture = Fixture::new();
        let catalog = fixture.catalog().await;
        // The tag already says b, the paths still point into a, and the directory is at b.
        let b = fill(&catalog, "b");
        let a = Tag::parse("a").unwrap();
        let id = catalog
            .store
            .insert(
                "b",
                &column(&catalog.layout.file(&a, FileKind::Libc)),
                &column(&catalog.layout.file(&a, FileKind::Ld)),
            )
            .await
            .unwrap();

        let first = reconcile(&catalog).await.unwrap();
        assert_eq!(first.intact, 0);
        assert_eq!(first.repaired.len(), 1);
        assert_eq!(first.repaired[0].id, id);
        let record = catalog.store.get(id).await.unwrap();
        assert_eq!(record.libc, column(&catalog.layout.file(&b, FileKind::Libc)));
        assert_eq!(record.ld, column(&catalog.layout.file(&b, FileKind::Ld)));

        let records = catalog.store.list().await.unwrap();
        let second = reconcile(&catalog).await.unwrap();
        assert_eq!(
            second,
            Report {
                intact: 1,
                ..Report::default()
            }
        );
        assert_eq!(catalog.store.list().await.unwrap(), records);
    }

    #[tokio::test]
    async fn stored_paths_outside_the_root_are_repaired() {
        let fixture = Fixture::new();
        let catalog = fixture.catalog().await;
        let outside = fixture.dir.path().join("outside");
        std::fs::write(&outside, b"not a libc").unwrap();
        fill(&catalog, "22.04-test");
        let id = catalog
            .store
            .insert("22.04-test", &column(&outside), &column(&outside))
            .await
            .unwrap();
        let report = reconcile(&catalog).await.unwrap();
        assert_eq!(report.repaired.len(), 1);
        let record = catalog.store.get(id).await.unwrap();
        assert!(Path::new(&record.libc).starts_with(catalog.layout.root()));
    }

    #[tokio::test]
    async fn broken_records_stay_broken_without_churn() {
        let fixture = Fixture::new();
        let catalog = fixture.catalog().await;
        let id = catalog.store.insert("20.04-latest", "/old/libc.so.6", "/old/ld").await.unwrap();
        let first = reconcile(&catalog).await.unwrap();
        assert_eq!(first.broken.len(), 1);
        assert_eq!(first.broken[0].id, id);
        assert!(catalog.layout.dir(&Tag::parse("20.04-latest").unwrap()).is_dir());
        let records = catalog.store.list().await.unwrap();
        let second = reconcile(&catalog).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(catalog.store.list().await.unwrap(), records);
    }

    #[tokio::test]
    async fn records_renamed_during_the_pass_are_judged_by_their_new_tag() {
        let fixture = Fixture::new();
        let catalog = fixture.catalog().await;
        let a = fill(&catalog, "a");
        let id = register(&catalog, &a).await;
        let b = Tag::parse("b").unwrap();

        // Hold the lock the pass is about to need, and rename the record while it waits.
        let guard = catalog.locks.lock(&a).await;
        let pass = {
            let catalog = catalog.clone();
            tokio::spawn(async move { reconcile(&catalog).await.unwrap() })
        };
        while catalog.locks.contenders(&a) < 2 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        std::fs::rename(catalog.layout.dir(&a), catalog.layout.dir(&b)).unwrap();
        catalog
            .store
            .update_tag(
                id,
                "b",
                &column(&catalog.layout.file(&b, FileKind::Libc)),
                &column(&catalog.layout.file(&b, FileKind::Ld)),
            )
            .await
            .unwrap();
        drop(guard);

        let report = pass.await.unwrap();
        assert_eq!(
            report,
            Report {
                intact: 1,
                ..Report::default()
            }
        );
        assert!(!catalog.layout.dir(&a).exists());
    }

    #[tokio::test]
    async fn unsafe_tags_are_broken_and_untouched() {
        let fixture = Fixture::new();
        let catalog = fixture.catalog().await;
        catalog.store.insert("../escape", "/x/1", "/x/2").await.unwrap();
        let report = reconcile(&catalog).await.unwrap();
        assert_eq!(report.broken.len(), 1);
        assert!(report.broken[0].reason.contains("not a safe directory name"));
        assert!(!fixture.dir.path().join("escape").exists());
    }
}
