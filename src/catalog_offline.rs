//! Offline catalog transport.
//!
//! Serves lookups from the `[offline.*]` name→id tables in the config so the
//! full pipeline can run when the remote service is unavailable. A table
//! entry matches when its normalized name equals the normalized primary
//! term of the query (artist for artist searches, album or track title
//! otherwise). Every match is returned on the first page; later offsets are
//! empty.

use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;

use crate::catalog::{CatalogTransport, PageAttempt, PageRequest, RawPage, SearchField};
use crate::config::OfflineConfig;
use crate::models::EntityKind;
use crate::normalize::Normalizer;

pub struct OfflineTransport {
    /// Per kind: (normalized name, display name, id), in table order.
    entries: BTreeMap<EntityKind, Vec<(String, String, String)>>,
}

impl OfflineTransport {
    pub fn new(config: &OfflineConfig, normalizer: &Normalizer) -> Self {
        let mut entries = BTreeMap::new();
        for kind in [EntityKind::Artist, EntityKind::Album, EntityKind::Track] {
            let rows = config
                .table(kind)
                .iter()
                .map(|(name, id)| (normalizer.normalize(name).to_lowercase(), name.clone(), id.clone()))
                .collect();
            entries.insert(kind, rows);
        }
        Self { entries }
    }

    pub fn len(&self, kind: EntityKind) -> usize {
        self.entries.get(&kind).map(Vec::len).unwrap_or(0)
    }
}

#[async_trait]
impl CatalogTransport for OfflineTransport {
    fn name(&self) -> &str {
        "offline"
    }

    async fn fetch_page(&self, request: &PageRequest) -> PageAttempt {
        if request.offset > 0 {
            return PageAttempt::Success(RawPage::default());
        }

        let kind = request.query.kind;
        let field = match kind {
            EntityKind::Artist => SearchField::Artist,
            EntityKind::Album => SearchField::Album,
            EntityKind::Track => SearchField::Track,
        };
        let Some(term) = request.query.term(field) else {
            return PageAttempt::Success(RawPage::default());
        };
        let term = term.to_lowercase();

        let items: Vec<_> = self
            .entries
            .get(&kind)
            .into_iter()
            .flatten()
            .filter(|(normalized, _, _)| *normalized == term)
            .map(|(_, name, id)| match request.query.term(SearchField::Artist) {
                Some(artist) if kind != EntityKind::Artist => json!({
                    "id": id,
                    "name": name,
                    "type": kind.as_str(),
                    "artists": [{"name": artist}],
                }),
                _ => json!({"id": id, "name": name, "type": kind.as_str()}),
            })
            .collect();

        let total = items.len() as u64;
        PageAttempt::Success(RawPage {
            items,
            declared_total: Some(total),
        })
    }
}
