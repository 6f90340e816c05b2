//! In-memory TMS used by the demo command and tests.
//!
//! Documents import immediately; targets complete as soon as they are
//! requested unless [`MockTms::hold_targets`] is set. Failures are injected
//! per call with [`MockTms::fail_next`].

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use uuid::Uuid;

use super::client::TmsClient;
use super::error::TmsError;
use super::types::{SourceDocument, TranslatedDocument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockCall {
    Upload,
    Update,
    CheckSource,
    AddTarget,
    CheckTarget,
    Download,
    CancelDocument,
    CancelTarget,
}

#[derive(Debug, Clone)]
struct MockDocument {
    source: SourceDocument,
    imported: bool,
    cancelled: bool,
    targets: BTreeMap<String, u8>,
}

#[derive(Default)]
struct MockState {
    documents: HashMap<String, MockDocument>,
    failures: HashMap<MockCall, VecDeque<TmsError>>,
    calls: HashMap<MockCall, usize>,
    translations: HashMap<(String, String), TranslatedDocument>,
    hold_imports: bool,
    hold_targets: bool,
}

#[derive(Default)]
pub struct MockTms {
    state: Mutex<MockState>,
}

impl MockTms {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Keep source imports incomplete until [`MockTms::finish_import`].
    pub fn hold_imports(&self) {
        self.state().hold_imports = true;
    }

    /// Keep new targets at 0% until [`MockTms::complete_target`].
    pub fn hold_targets(&self) {
        self.state().hold_targets = true;
    }

    pub fn finish_import(&self, document_id: &str) {
        if let Some(doc) = self.state().documents.get_mut(document_id) {
            doc.imported = true;
        }
    }

    pub fn complete_target(&self, document_id: &str, locale: &str) {
        if let Some(doc) = self.state().documents.get_mut(document_id) {
            doc.targets.insert(locale.to_string(), 100);
        }
    }

    /// The next `call` fails with `error`.
    pub fn fail_next(&self, call: MockCall, error: TmsError) {
        self.state().failures.entry(call).or_default().push_back(error);
    }

    /// Serve `translated` instead of the generated translation.
    pub fn set_translation(&self, document_id: &str, locale: &str, translated: TranslatedDocument) {
        self.state()
            .translations
            .insert((document_id.to_string(), locale.to_string()), translated);
    }

    /// Forget a document as if it had been archived remotely.
    pub fn archive(&self, document_id: &str) {
        self.state().documents.remove(document_id);
    }

    pub fn calls(&self, call: MockCall) -> usize {
        self.state().calls.get(&call).copied().unwrap_or(0)
    }

    pub fn document(&self, document_id: &str) -> Option<SourceDocument> {
        self.state().documents.get(document_id).map(|d| d.source.clone())
    }

    pub fn is_cancelled(&self, document_id: &str) -> bool {
        self.state()
            .documents
            .get(document_id)
            .is_some_and(|d| d.cancelled)
    }

    pub fn target_cancelled(&self, document_id: &str, locale: &str) -> bool {
        self.state()
            .documents
            .get(document_id)
            .is_some_and(|d| !d.targets.contains_key(locale))
    }

    fn begin(&self, call: MockCall) -> Result<MutexGuard<'_, MockState>, TmsError> {
        let mut state = self.state();
        *state.calls.entry(call).or_default() += 1;
        if let Some(err) = state.failures.get_mut(&call).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(state)
    }
}

fn archived(document_id: &str) -> TmsError {
    TmsError::DocumentArchived {
        document_id: document_id.to_string(),
    }
}

impl TmsClient for MockTms {
    async fn upload(&self, doc: &SourceDocument) -> Result<String, TmsError> {
        let mut state = self.begin(MockCall::Upload)?;
        let id = Uuid::new_v4().to_string();
        let imported = !state.hold_imports;
        state.documents.insert(
            id.clone(),
            MockDocument {
                source: doc.clone(),
                imported,
                cancelled: false,
                targets: BTreeMap::new(),
            },
        );
        Ok(id)
    }

    async fn update(&self, document_id: &str, doc: &SourceDocument) -> Result<(), TmsError> {
        let mut state = self.begin(MockCall::Update)?;
        let imported = !state.hold_imports;
        let existing = state
            .documents
            .get_mut(document_id)
            .ok_or_else(|| archived(document_id))?;
        existing.source = doc.clone();
        existing.imported = imported;
        Ok(())
    }

    async fn check_source_status(&self, document_id: &str) -> Result<bool, TmsError> {
        let state = self.begin(MockCall::CheckSource)?;
        state
            .documents
            .get(document_id)
            .map(|d| d.imported)
            .ok_or_else(|| archived(document_id))
    }

    async fn add_target(&self, document_id: &str, locale: &str) -> Result<(), TmsError> {
        let mut state = self.begin(MockCall::AddTarget)?;
        let progress = if state.hold_targets { 0 } else { 100 };
        let doc = state
            .documents
            .get_mut(document_id)
            .ok_or_else(|| archived(document_id))?;
        doc.targets.insert(locale.to_string(), progress);
        Ok(())
    }

    async fn check_target_status(&self, document_id: &str, locale: &str) -> Result<u8, TmsError> {
        let state = self.begin(MockCall::CheckTarget)?;
        let doc = state
            .documents
            .get(document_id)
            .ok_or_else(|| archived(document_id))?;
        doc.targets
            .get(locale)
            .copied()
            .ok_or_else(|| TmsError::InvalidResponse(format!("no translation for {locale}")))
    }

    async fn download(
        &self,
        document_id: &str,
        locale: &str,
    ) -> Result<TranslatedDocument, TmsError> {
        let state = self.begin(MockCall::Download)?;
        if let Some(translated) = state
            .translations
            .get(&(document_id.to_string(), locale.to_string()))
        {
            return Ok(translated.clone());
        }
        let doc = state
            .documents
            .get(document_id)
            .ok_or_else(|| archived(document_id))?;
        let fields = doc
            .source
            .fields
            .iter()
            .map(|(name, value)| (name.clone(), format!("{value} ({locale})")))
            .collect();
        Ok(TranslatedDocument { fields })
    }

    async fn cancel_document(&self, document_id: &str) -> Result<(), TmsError> {
        let mut state = self.begin(MockCall::CancelDocument)?;
        let doc = state
            .documents
            .get_mut(document_id)
            .ok_or_else(|| archived(document_id))?;
        doc.cancelled = true;
        Ok(())
    }

    async fn cancel_target(&self, document_id: &str, locale: &str) -> Result<(), TmsError> {
        let mut state = self.begin(MockCall::CancelTarget)?;
        let doc = state
            .documents
            .get_mut(document_id)
            .ok_or_else(|| archived(document_id))?;
        doc.targets.remove(locale);
        Ok(())
    }
}
