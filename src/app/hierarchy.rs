//! Per-country administrative hierarchy service
//!
//! Indexes the class-A records of one country by their admin code tuple and
//! answers name lookups for populated places. The service is a serial
//! mailbox task: it lives for exactly one country's curation, and tears
//! itself down once every handle is dropped after enrichment.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::app::models::GeonameRecord;

/// Admin code tuple addressing one hierarchy node
type AdminKey = (
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
);

/// Lookup table from admin code tuples to display names
#[derive(Debug, Default)]
pub struct HierarchyIndex {
    names: HashMap<AdminKey, String>,
}

impl HierarchyIndex {
    /// Index the admin records of one country
    pub fn build(admins: &[GeonameRecord]) -> Self {
        let mut names = HashMap::with_capacity(admins.len());
        for record in admins {
            let key = (
                record.country_code.clone(),
                record.admin1.clone(),
                record.admin2.clone(),
                record.admin3.clone(),
                record.admin4.clone(),
            );
            names.insert(key, record.name.clone());
        }
        Self { names }
    }

    /// Attach every admin label the index can resolve
    ///
    /// Levels are resolved by progressively extending the key; a missing
    /// admin component on the record short-circuits all deeper levels to
    /// absent.
    pub fn annotate(&self, mut record: GeonameRecord) -> GeonameRecord {
        let cc = record.country_code.clone();
        let Some(a1) = record.admin1.clone() else {
            return record;
        };
        record.admin1_txt = self.name_of((cc.clone(), Some(a1.clone()), None, None, None));
        let Some(a2) = record.admin2.clone() else {
            return record;
        };
        record.admin2_txt =
            self.name_of((cc.clone(), Some(a1.clone()), Some(a2.clone()), None, None));
        let Some(a3) = record.admin3.clone() else {
            return record;
        };
        record.admin3_txt = self.name_of((
            cc.clone(),
            Some(a1.clone()),
            Some(a2.clone()),
            Some(a3.clone()),
            None,
        ));
        let Some(a4) = record.admin4.clone() else {
            return record;
        };
        record.admin4_txt = self.name_of((cc, Some(a1), Some(a2), Some(a3), Some(a4)));
        record
    }

    fn name_of(&self, key: AdminKey) -> Option<String> {
        self.names.get(&key).cloned()
    }
}

pub(crate) struct NameLookup {
    record: GeonameRecord,
    reply: oneshot::Sender<GeonameRecord>,
}

/// Handle to a running hierarchy service
///
/// Cheap to clone; the service exits once the last handle is gone.
#[derive(Clone)]
pub struct HierarchyHandle {
    pub(crate) tx: mpsc::Sender<NameLookup>,
}

impl HierarchyHandle {
    /// Resolve admin labels for one populated record
    ///
    /// Returns `None` when the service is no longer reachable; the enricher
    /// accounts for such dropped replies.
    pub async fn name_lookup(&self, record: GeonameRecord) -> Option<GeonameRecord> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(NameLookup {
                record,
                reply: reply_tx,
            })
            .await
            .ok()?;
        reply_rx.await.ok()
    }
}

/// Start the hierarchy service for one country
pub fn spawn(cc: &str, admins: Vec<GeonameRecord>) -> HierarchyHandle {
    let (tx, mut rx) = mpsc::channel::<NameLookup>(64);
    let country = cc.to_string();
    tokio::spawn(async move {
        let index = HierarchyIndex::build(&admins);
        while let Some(NameLookup { record, reply }) = rx.recv().await {
            let _ = reply.send(index.annotate(record));
        }
        debug!("{country}: hierarchy service torn down");
    });
    HierarchyHandle { tx }
}
