//! Background refresh of generated display names.

use pv_core::{Category, Database, Item, NameResolver};
use pv_utils::CancellationToken;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::Platform;

/// One item visited by a refresh batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshTarget {
    pub category: Category,
    pub url: String,
    /// Whether the item's name should be looked up again.
    pub stale: bool,
}

/// Message sent from the refresh worker to its driver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefreshEvent {
    Progress { processed: usize, total: usize },
    Renamed { category: Category, url: String, name: String },
}

/// Outcome of a refresh batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub processed: usize,
    pub total: usize,
    pub cancelled: bool,
}

/// Whether an item's name was never set by hand.
///
/// Missing names, names equal to the URL and names carrying a platform
/// emoji are all considered generated.
pub fn should_refresh(item: &Item) -> bool {
    match item.name.as_deref() {
        None | Some("") => true,
        Some(name) => name == item.url || Platform::is_generated_name(name),
    }
}

/// Every item of the database in script order.
pub fn plan_refresh(database: &Database) -> Vec<RefreshTarget> {
    Category::ALL
        .iter()
        .flat_map(|&category| {
            database.items(category).iter().map(move |item| RefreshTarget {
                category,
                url: item.url.clone(),
                stale: should_refresh(item),
            })
        })
        .collect()
}

/// Resolve names for `targets` on a blocking worker.
///
/// Cancellation is checked before each item; a lookup already in flight
/// finishes first. Every visited item counts as processed whether or not a
/// new name was found.
pub fn spawn_refresh<R>(
    resolver: R,
    targets: Vec<RefreshTarget>,
    cancel: CancellationToken,
) -> (UnboundedReceiver<RefreshEvent>, JoinHandle<RefreshSummary>)
where
    R: NameResolver + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::task::spawn_blocking(move || {
        let total = targets.len();
        let mut summary = RefreshSummary {
            total,
            ..RefreshSummary::default()
        };

        for target in targets {
            if let Err(err) = cancel.check() {
                debug!(error = %err, processed = summary.processed, "stopping name refresh");
                summary.cancelled = true;
                break;
            }
            if target.stale {
                match resolver.resolve(&target.url) {
                    Some(name) if !name.is_empty() && name != target.url => {
                        let _ = tx.send(RefreshEvent::Renamed {
                            category: target.category,
                            url: target.url,
                            name,
                        });
                    }
                    _ => debug!(url = %target.url, "no new name"),
                }
            }
            summary.processed += 1;
            let _ = tx.send(RefreshEvent::Progress {
                processed: summary.processed,
                total,
            });
        }

        info!(
            processed = summary.processed,
            total = summary.total,
            cancelled = summary.cancelled,
            "name refresh finished"
        );
        summary
    });
    (rx, handle)
}

/// Apply a worker event to the database. Returns whether a name changed.
pub fn apply_event(database: &mut Database, event: &RefreshEvent) -> bool {
    match event {
        RefreshEvent::Renamed {
            category,
            url,
            name,
        } => database.set_name(*category, url, Some(name.clone())),
        RefreshEvent::Progress { .. } => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pv_core::NoNames;

    struct Fixed;

    impl NameResolver for Fixed {
        fn resolve(&self, url: &str) -> Option<String> {
            match url {
                "same" => Some("same".into()),
                "none" => None,
                other => Some(format!("🔗 {other}")),
            }
        }
    }

    struct CancelAfter {
        url: &'static str,
        cancel: CancellationToken,
    }

    impl NameResolver for CancelAfter {
        fn resolve(&self, url: &str) -> Option<String> {
            if url == self.url {
                self.cancel.cancel();
            }
            None
        }
    }

    fn item(url: &str, name: Option<&str>) -> Item {
        let mut item = Item::new(url);
        item.name = name.map(String::from);
        item
    }

    fn target(url: &str) -> RefreshTarget {
        RefreshTarget {
            category: Category::LoraModels,
            url: url.into(),
            stale: true,
        }
    }

    async fn drain(
        mut rx: UnboundedReceiver<RefreshEvent>,
        handle: JoinHandle<RefreshSummary>,
    ) -> (Vec<RefreshEvent>, RefreshSummary) {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (events, handle.await.expect("worker"))
    }

    #[test]
    fn generated_names_are_refreshed() {
        assert!(should_refresh(&item("u", None)));
        assert!(should_refresh(&item("u", Some(""))));
        assert!(should_refresh(&item("u", Some("u"))));
        assert!(should_refresh(&item("u", Some("🤗 org/repo"))));
        assert!(!should_refresh(&item("u", Some("My model"))));
    }

    #[test]
    fn plan_covers_every_item() {
        let mut db = Database::new();
        db.add_item(Category::Nodes, "https://github.com/a/b", true, &NoNames);
        db.add_item(Category::LoraModels, "https://x/l.safetensors", false, &NoNames);
        db.set_name(Category::LoraModels, "https://x/l.safetensors", Some("Mine".into()));

        let plan = plan_refresh(&db);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].category, Category::Nodes);
        assert!(plan[0].stale);
        assert!(!plan[1].stale);
    }

    #[tokio::test]
    async fn worker_reports_only_useful_names() {
        let mut stale_skip = target("kept");
        stale_skip.stale = false;
        let targets = vec![target("a"), target("same"), target("none"), stale_skip];

        let (rx, handle) = spawn_refresh(Fixed, targets, CancellationToken::new());
        let (events, summary) = drain(rx, handle).await;

        let renamed: Vec<&RefreshEvent> = events
            .iter()
            .filter(|event| matches!(event, RefreshEvent::Renamed { .. }))
            .collect();
        assert_eq!(
            renamed,
            vec![&RefreshEvent::Renamed {
                category: Category::LoraModels,
                url: "a".into(),
                name: "🔗 a".into(),
            }]
        );
        assert_eq!(
            summary,
            RefreshSummary {
                processed: 4,
                total: 4,
                cancelled: false
            }
        );
        assert_eq!(
            events.last(),
            Some(&RefreshEvent::Progress {
                processed: 4,
                total: 4
            })
        );
    }

    #[tokio::test]
    async fn cancellation_stops_between_items() {
        let cancel = CancellationToken::new();
        let resolver = CancelAfter {
            url: "second",
            cancel: cancel.clone(),
        };
        let targets = vec![target("first"), target("second"), target("third")];

        let (rx, handle) = spawn_refresh(resolver, targets, cancel);
        let (_, summary) = drain(rx, handle).await;

        assert_eq!(
            summary,
            RefreshSummary {
                processed: 2,
                total: 3,
                cancelled: true
            }
        );
    }

    #[test]
    fn renamed_events_update_the_database() {
        let mut db = Database::new();
        db.add_item(Category::VaeModels, "https://x/v.pt", true, &NoNames);

        let event = RefreshEvent::Renamed {
            category: Category::VaeModels,
            url: "https://x/v.pt".into(),
            name: "🔗 v.pt".into(),
        };
        assert!(apply_event(&mut db, &event));
        assert_eq!(
            db.find(Category::VaeModels, "https://x/v.pt")
                .and_then(|item| item.name.as_deref()),
            Some("🔗 v.pt")
        );
        assert!(!apply_event(
            &mut db,
            &RefreshEvent::Progress {
                processed: 1,
                total: 1
            }
        ));
    }
}
