//! Mail lifecycle controller
//!
//! Decides, for one mail, whether it has to be classified, learned,
//! relearned after a manual move, or left alone. The folder a mail sits in
//! is its placement class; the verdict ledger in the store remembers the
//! class the filter last assigned.
//!
//! | folder  | verdict      | action                                     |
//! |---------|--------------|--------------------------------------------|
//! | new     | none         | classify, move junk to `.Junk/cur`, learn  |
//! | any     | = placement  | nothing                                    |
//! | cur/.Junk | none       | learn under the placement class            |
//! | any     | ≠ placement  | relearn under the placement class          |
//!
//! The bulk cycle and the arrival watcher act on the same mails. Every
//! decision holds the mailbox's filing lock and reads the mail's current
//! folder, never the one from an earlier listing.

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bayes::{BayesianClassifier, Class, Classification};
use crate::error::{JunkError, Result};
use crate::maildir::{Folder, MailEntry, MailSource};
use crate::store::StatsStore;
use crate::tokenizer::Tokenizer;

/// Outcome of processing one mail
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transition {
    /// Verdict matches placement
    Unchanged,
    /// Store cannot classify yet; retried on the next cycle
    Deferred,
    /// Classified on arrival (and moved to junk if needed)
    Classified(Classification),
    /// Learned for the first time under its placement class
    Learned(Class),
    /// Moved by the user after an earlier verdict
    Relearned { from: Class, to: Class },
}

/// Outcome counts of one bulk cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub unchanged: usize,
    pub deferred: usize,
    pub classified_good: usize,
    pub classified_junk: usize,
    pub learned: usize,
    pub relearned: usize,
    pub failed: usize,
}

impl CycleReport {
    fn record(&mut self, transition: &Transition) {
        match transition {
            Transition::Unchanged => self.unchanged += 1,
            Transition::Deferred => self.deferred += 1,
            Transition::Classified(c) if c.is_junk => self.classified_junk += 1,
            Transition::Classified(_) => self.classified_good += 1,
            Transition::Learned(_) => self.learned += 1,
            Transition::Relearned { .. } => self.relearned += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.unchanged
            + self.deferred
            + self.classified_good
            + self.classified_junk
            + self.learned
            + self.relearned
            + self.failed
    }
}

pub struct MailLifecycle<'a> {
    store: &'a StatsStore,
    source: &'a dyn MailSource,
    tokenizer: &'a Tokenizer,
    filing: &'a Mutex<()>,
}

impl<'a> MailLifecycle<'a> {
    pub fn new(
        store: &'a StatsStore,
        source: &'a dyn MailSource,
        tokenizer: &'a Tokenizer,
        filing: &'a Mutex<()>,
    ) -> Self {
        Self {
            store,
            source,
            tokenizer,
            filing,
        }
    }

    /// Bring one mail's statistics in line with its folder
    pub async fn process(&self, entry: &MailEntry) -> Result<Transition> {
        let _filing = self.filing.lock().await;

        let folder = self.current_folder(&entry.id).await?;
        if folder != entry.folder {
            debug!("{} moved from {} to {} since listing", entry.id, entry.folder, folder);
        }

        let verdict = self.store.verdict(&entry.id).await?;
        let placement = folder.placement();

        match (folder, verdict) {
            (Folder::New, None) => self.classify_unfiled(&entry.id).await,
            (_, Some(previous)) if previous == placement => Ok(Transition::Unchanged),
            (_, None) => {
                let words = self.words(&entry.id).await?;
                self.store.learn_and_record(placement, &entry.id, &words).await?;
                info!("Learned {} as {}", entry.id, placement);
                Ok(Transition::Learned(placement))
            }
            (_, Some(previous)) => {
                let words = self.words(&entry.id).await?;
                self.store.learn_and_record(placement, &entry.id, &words).await?;
                info!("Relearned {} as {} (was {})", entry.id, placement, previous);
                Ok(Transition::Relearned {
                    from: previous,
                    to: placement,
                })
            }
        }
    }

    /// Classify a mail sitting in `new/`, filing it into `.Junk` when junk
    pub async fn classify_new(&self, id: &str) -> Result<Transition> {
        let _filing = self.filing.lock().await;

        if self.store.verdict(id).await?.is_some() {
            debug!("{} already has a verdict", id);
            return Ok(Transition::Unchanged);
        }

        let folder = self.current_folder(id).await?;
        if folder != Folder::New {
            // Filed by the user first; the bulk cycle learns it
            debug!("{} is in {}, not classifying", id, folder);
            return Ok(Transition::Unchanged);
        }

        self.classify_unfiled(id).await
    }

    /// Learn a mail as `class` on the user's say-so, filing it to match so
    /// that later cycles agree with the recorded verdict
    pub async fn learn_as(&self, id: &str, class: Class) -> Result<()> {
        let _filing = self.filing.lock().await;

        let folder = self.current_folder(id).await?;
        let words = self.words(id).await?;

        if folder.placement() != class {
            self.source.move_to(id, folder, Folder::filed(class)).await?;
        }
        self.store.learn_and_record(class, id, &words).await?;

        info!("Learned {} as {}", id, class);
        Ok(())
    }

    /// Run every listed mail through [`MailLifecycle::process`].
    ///
    /// A failing mail is logged and counted; it stays where it is.
    /// Cancellation is checked between mails, never inside one.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        for entry in self.source.list().await? {
            if cancel.is_cancelled() {
                debug!("Cycle interrupted after {} mails", report.total());
                break;
            }
            match self.process(&entry).await {
                Ok(transition) => report.record(&transition),
                Err(e) => {
                    warn!("Failed to process {} in {}: {}", entry.id, entry.folder, e);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Caller holds the filing lock and has checked the mail is unfiled
    async fn classify_unfiled(&self, id: &str) -> Result<Transition> {
        let words = self.words(id).await?;
        let classification = match BayesianClassifier::new(self.store).classify(&words).await {
            Ok(classification) => classification,
            Err(e) if e.is_untrained() => {
                debug!("Deferring {}: {}", id, e);
                return Ok(Transition::Deferred);
            }
            Err(e) => return Err(e),
        };

        if classification.is_junk {
            self.source.move_to(id, Folder::New, Folder::Junk).await?;
        }

        let class = classification.class();
        self.store.learn_and_record(class, id, &words).await?;

        info!(
            "Classified {} as {} (good probability {:.4})",
            id, class, classification.probability
        );
        Ok(Transition::Classified(classification))
    }

    async fn current_folder(&self, id: &str) -> Result<Folder> {
        self.source
            .folder_of(id)
            .await?
            .ok_or_else(|| JunkError::MessageNotFound(id.to_string()))
    }

    async fn words(&self, id: &str) -> Result<Vec<String>> {
        let mail = self.source.load(id).await?;
        Ok(self.tokenizer.tokenize(&mail.subject, &mail.body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::maildir::MaildirSource;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const GOOD_MAIL: &str = "Subject: Project meeting\r\n\r\n\
        The weekly project meeting moves to thursday afternoon.\r\n";
    const JUNK_MAIL: &str = "Subject: Lottery winner\r\n\r\n\
        Claim your lottery prize money today from london.\r\n";

    struct Fixture {
        dir: TempDir,
        store: StatsStore,
        source: MaildirSource,
        tokenizer: Tokenizer,
        filing: Mutex<()>,
    }

    impl Fixture {
        async fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let source = MaildirSource::open(dir.path()).await.unwrap();
            let store = StatsStore::open(&dir.path().join("junk.db"), &StoreConfig::default())
                .await
                .unwrap();
            Self {
                dir,
                store,
                source,
                tokenizer: Tokenizer::new().unwrap(),
                filing: Mutex::new(()),
            }
        }

        fn lifecycle(&self) -> MailLifecycle<'_> {
            MailLifecycle::new(&self.store, &self.source, &self.tokenizer, &self.filing)
        }

        fn deliver(&self, dir: &str, name: &str, content: &str) {
            std::fs::write(self.dir.path().join(dir).join(name), content).unwrap();
        }

        fn path(&self, rel: &str) -> PathBuf {
            self.dir.path().join(rel)
        }

        async fn train(&self) {
            self.deliver("cur", "100.good:2,S", GOOD_MAIL);
            self.deliver(".Junk/cur", "200.junk:2,", JUNK_MAIL);
            let report = self.lifecycle().run_cycle(&CancellationToken::new()).await.unwrap();
            assert_eq!(report.learned, 2);
        }
    }

    #[tokio::test]
    async fn test_filed_mail_is_learned_under_placement() {
        let fx = Fixture::new().await;
        fx.deliver("cur", "1.a:2,S", GOOD_MAIL);

        let entry = MailEntry { id: "1.a".into(), folder: Folder::Cur };
        let transition = fx.lifecycle().process(&entry).await.unwrap();

        assert_eq!(transition, Transition::Learned(Class::Good));
        assert_eq!(fx.store.verdict("1.a").await.unwrap(), Some(Class::Good));
        assert_eq!(fx.store.stats().await.unwrap().good_total, 1);

        // Second pass sees a matching verdict
        let transition = fx.lifecycle().process(&entry).await.unwrap();
        assert_eq!(transition, Transition::Unchanged);
    }

    #[tokio::test]
    async fn test_new_mail_deferred_on_untrained_store() {
        let fx = Fixture::new().await;
        fx.deliver("new", "1.a", JUNK_MAIL);

        let transition = fx.lifecycle().classify_new("1.a").await.unwrap();

        assert_eq!(transition, Transition::Deferred);
        assert!(fx.path("new/1.a").exists());
        assert_eq!(fx.store.verdict("1.a").await.unwrap(), None);
        assert_eq!(fx.store.stats().await.unwrap().junk_total, 0);
    }

    #[tokio::test]
    async fn test_new_junk_mail_moved_and_learned() {
        let fx = Fixture::new().await;
        fx.train().await;
        fx.deliver("new", "3.c", "Subject: London lottery\r\n\r\nWinner\r\n");

        let transition = fx.lifecycle().classify_new("3.c").await.unwrap();

        match transition {
            Transition::Classified(c) => assert!(c.is_junk),
            other => panic!("unexpected transition {:?}", other),
        }
        assert!(!fx.path("new/3.c").exists());
        assert!(fx.path(".Junk/cur/3.c").exists());
        assert_eq!(fx.store.verdict("3.c").await.unwrap(), Some(Class::Junk));
        assert_eq!(fx.store.stats().await.unwrap().junk_total, 2);
    }

    #[tokio::test]
    async fn test_new_good_mail_stays_in_new() {
        let fx = Fixture::new().await;
        fx.train().await;
        fx.deliver("new", "4.d", "Subject: Project meeting\r\n\r\nThursday afternoon\r\n");

        let transition = fx.lifecycle().classify_new("4.d").await.unwrap();

        match transition {
            Transition::Classified(c) => assert!(!c.is_junk),
            other => panic!("unexpected transition {:?}", other),
        }
        assert!(fx.path("new/4.d").exists());
        assert_eq!(fx.store.verdict("4.d").await.unwrap(), Some(Class::Good));

        // Already classified: the next event is a no-op
        let transition = fx.lifecycle().classify_new("4.d").await.unwrap();
        assert_eq!(transition, Transition::Unchanged);
    }

    #[tokio::test]
    async fn test_manual_move_is_relearned() {
        let fx = Fixture::new().await;
        fx.train().await;

        // The user rescues a junk verdict into cur/
        std::fs::rename(fx.path(".Junk/cur/200.junk:2,"), fx.path("cur/200.junk:2,S")).unwrap();

        let report = fx.lifecycle().run_cycle(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.relearned, 1);
        assert_eq!(report.unchanged, 1);
        assert_eq!(fx.store.verdict("200.junk").await.unwrap(), Some(Class::Good));
        assert_eq!(fx.store.stats().await.unwrap().good_total, 2);
    }

    #[tokio::test]
    async fn test_relearn_transition_reports_classes() {
        let fx = Fixture::new().await;
        fx.deliver(".Junk/cur", "5.e", GOOD_MAIL);
        fx.store.record_verdict("5.e", Class::Good).await.unwrap();

        let entry = MailEntry { id: "5.e".into(), folder: Folder::Junk };
        let transition = fx.lifecycle().process(&entry).await.unwrap();

        assert_eq!(
            transition,
            Transition::Relearned {
                from: Class::Good,
                to: Class::Junk
            }
        );
    }

    #[tokio::test]
    async fn test_unreadable_mail_is_not_learned() {
        let fx = Fixture::new().await;
        let entry = MailEntry { id: "missing".into(), folder: Folder::Cur };

        let result = fx.lifecycle().process(&entry).await;
        assert!(matches!(result, Err(JunkError::MessageNotFound(_))));
        assert_eq!(fx.store.verdict("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cancelled_cycle_processes_nothing() {
        let fx = Fixture::new().await;
        fx.deliver("cur", "1.a", GOOD_MAIL);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = fx.lifecycle().run_cycle(&cancel).await.unwrap();

        assert_eq!(report.total(), 0);
        assert_eq!(fx.store.verdict("1.a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cycle_counts_outcomes() {
        let fx = Fixture::new().await;
        fx.train().await;
        fx.deliver("new", "6.f", "Subject: London lottery\r\n\r\nWinner\r\n");
        fx.deliver("new", "7.g", "Subject: Project meeting\r\n\r\nThursday afternoon\r\n");

        let report = fx.lifecycle().run_cycle(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.unchanged, 2);
        assert_eq!(report.classified_junk, 1);
        assert_eq!(report.classified_good, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(report.total(), 4);
        assert!(fx.path(".Junk/cur/6.f").exists());
    }

    #[tokio::test]
    async fn test_stale_listing_after_arrival_is_unchanged() {
        let fx = Fixture::new().await;
        fx.train().await;
        fx.deliver("new", "8.h", "Subject: London lottery\r\n\r\nWinner\r\n");

        let listed = fx.source.list().await.unwrap();
        let stale = listed.iter().find(|e| e.id == "8.h").unwrap().clone();
        assert_eq!(stale.folder, Folder::New);

        // The watcher files the mail before the cycle gets to it
        let transition = fx.lifecycle().classify_new("8.h").await.unwrap();
        assert!(matches!(transition, Transition::Classified(c) if c.is_junk));

        let transition = fx.lifecycle().process(&stale).await.unwrap();
        assert_eq!(transition, Transition::Unchanged);
        assert_eq!(fx.store.verdict("8.h").await.unwrap(), Some(Class::Junk));
        assert!(fx.path(".Junk/cur/8.h").exists());

        let stats = fx.store.stats().await.unwrap();
        assert_eq!(stats.good_total, 1);
        assert_eq!(stats.junk_total, 2);
    }

    #[tokio::test]
    async fn test_arrival_already_filed_by_user_is_left_to_cycle() {
        let fx = Fixture::new().await;
        fx.train().await;
        fx.deliver("cur", "9.i:2,S", JUNK_MAIL);

        let transition = fx.lifecycle().classify_new("9.i").await.unwrap();
        assert_eq!(transition, Transition::Unchanged);
        assert!(fx.path("cur/9.i:2,S").exists());
        assert_eq!(fx.store.verdict("9.i").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_learn_as_files_mail_to_match() {
        let fx = Fixture::new().await;
        fx.deliver("cur", "10.j:2,S", JUNK_MAIL);

        fx.lifecycle().learn_as("10.j", Class::Junk).await.unwrap();

        assert!(!fx.path("cur/10.j:2,S").exists());
        assert!(fx.path(".Junk/cur/10.j:2,S").exists());
        assert_eq!(fx.store.verdict("10.j").await.unwrap(), Some(Class::Junk));

        let report = fx.lifecycle().run_cycle(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.unchanged, 1);
        assert_eq!(report.relearned, 0);
        assert_eq!(fx.store.stats().await.unwrap().good_total, 0);
    }

    #[tokio::test]
    async fn test_learn_as_good_leaves_new_mail_in_place() {
        let fx = Fixture::new().await;
        fx.deliver("new", "11.k", GOOD_MAIL);

        fx.lifecycle().learn_as("11.k", Class::Good).await.unwrap();

        assert!(fx.path("new/11.k").exists());
        assert_eq!(fx.store.verdict("11.k").await.unwrap(), Some(Class::Good));
    }

    #[tokio::test]
    async fn test_arrivals_interleaved_with_cycle_stay_consistent() {
        let fx = Fixture::new().await;
        fx.train().await;
        fx.deliver("new", "12.l", "Subject: London lottery\r\n\r\nWinner\r\n");
        fx.deliver("new", "13.m", "Subject: Project meeting\r\n\r\nThursday afternoon\r\n");

        let lifecycle = fx.lifecycle();
        let cancel = CancellationToken::new();
        let (report, junk, good) = tokio::join!(
            lifecycle.run_cycle(&cancel),
            lifecycle.classify_new("12.l"),
            lifecycle.classify_new("13.m"),
        );
        let report = report.unwrap();
        junk.unwrap();
        good.unwrap();

        assert_eq!(report.failed, 0);
        assert_eq!(report.relearned, 0);

        for entry in fx.source.list().await.unwrap() {
            assert_eq!(
                fx.store.verdict(&entry.id).await.unwrap(),
                Some(entry.folder.placement()),
                "{} in {}",
                entry.id,
                entry.folder
            );
        }
        assert!(fx.path(".Junk/cur/12.l").exists());
        assert!(fx.path("new/13.m").exists());

        let stats = fx.store.stats().await.unwrap();
        assert_eq!(stats.good_total, 2);
        assert_eq!(stats.junk_total, 2);
    }
}
