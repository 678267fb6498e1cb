//! Per-group background workers and the process-wide group registry.
//!
//! Each enabled group gets exactly one session and one worker task. The
//! worker sleeps a randomized interval (a human does not read instantly, and
//! bursts coalesce into one batch), drains the pending queue under the
//! session mutex, runs the pipeline and sends the replies. Ingress only ever
//! appends to the pending queue.

use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::adapter::{render_parts, ChatPlatform, InboundEvent};
use crate::config::Config;
use crate::image::ImageDescriber;
use crate::llm::embeddings::TextEmbedder;
use crate::llm::provider::LlmProvider;
use crate::memory::chunk::Chunker;
use crate::memory::index::SqliteVectorIndex;
use crate::memory::long_term::LongTermMemory;
use crate::memory::short_term::ChatMessage;
use crate::presets::PresetRegistry;
use crate::session::Session;

/// Randomized polling interval, in seconds.
const POLL_MIN_SECS: f64 = 5.0;
const POLL_MAX_SECS: f64 = 10.0;

pub type SharedSession = Arc<Mutex<Session>>;

struct GroupHandle {
    session: SharedSession,
    worker: JoinHandle<()>,
}

/// Process-wide state: one session + worker per enabled group, plus the
/// immutable preset registry. Created once at startup.
pub struct GroupRegistry {
    config: Config,
    /// The agent's own platform account id, for `@` rewriting.
    self_id: String,
    llm: Arc<dyn LlmProvider>,
    embedder: Arc<dyn TextEmbedder>,
    platform: Arc<dyn ChatPlatform>,
    images: Arc<dyn ImageDescriber>,
    presets: Arc<PresetRegistry>,
    groups: Mutex<HashMap<i64, GroupHandle>>,
}

impl GroupRegistry {
    pub fn new(
        config: Config,
        self_id: impl Into<String>,
        llm: Arc<dyn LlmProvider>,
        embedder: Arc<dyn TextEmbedder>,
        platform: Arc<dyn ChatPlatform>,
        images: Arc<dyn ImageDescriber>,
    ) -> Self {
        let presets = Arc::new(PresetRegistry::load(&config.preset_dir));
        Self {
            config,
            self_id: self_id.into(),
            llm,
            embedder,
            platform,
            images,
            presets,
            groups: Mutex::new(HashMap::new()),
        }
    }

    pub fn presets(&self) -> &PresetRegistry {
        &self.presets
    }

    pub fn enabled_groups(&self) -> &[i64] {
        &self.config.enabled_groups
    }

    pub fn is_enabled(&self, group_id: i64) -> bool {
        self.config.enabled_groups.contains(&group_id)
    }

    /// The session for an enabled group, creating it — and spawning its
    /// worker, exactly once — on first use. `None` for disabled groups.
    pub async fn session(&self, group_id: i64) -> anyhow::Result<Option<SharedSession>> {
        if !self.is_enabled(group_id) {
            return Ok(None);
        }
        let mut groups = self.groups.lock().await;
        if let Some(handle) = groups.get(&group_id) {
            return Ok(Some(Arc::clone(&handle.session)));
        }

        let index_dir = self.config.data_dir.join(format!("hippo_index_{}", group_id));
        let index = SqliteVectorIndex::open(index_dir, Arc::clone(&self.embedder)).await?;
        let chunker = match &self.config.tokenizer_file {
            Some(path) => Chunker::from_file(path),
            None => Chunker::approximate(),
        };
        let long_term = LongTermMemory::new(Arc::new(index), Arc::clone(&self.embedder), chunker);
        let session = Session::new(
            group_id.to_string(),
            Arc::clone(&self.llm),
            self.config.chat_openai_model.clone(),
            long_term,
            self.config.data_dir.clone(),
        )
        .await;

        let session = Arc::new(Mutex::new(session));
        let worker = tokio::spawn(run_worker(
            Arc::clone(&session),
            Arc::clone(&self.platform),
            group_id,
        ));
        info!("spawned worker for group {}", group_id);
        groups.insert(
            group_id,
            GroupHandle {
                session: Arc::clone(&session),
                worker,
            },
        );
        Ok(Some(session))
    }

    /// Ingress: render the message parts and queue the result. The session
    /// mutex is held only for the append, never across network calls.
    pub async fn handle_inbound(&self, event: InboundEvent) -> anyhow::Result<()> {
        if event.from_self {
            return Ok(());
        }
        let Some(session) = self.session(event.group_id).await? else {
            return Ok(());
        };

        let agent_name = session.lock().await.name().to_string();
        let content = render_parts(
            &agent_name,
            &self.self_id,
            event.group_id,
            &event.parts,
            self.platform.as_ref(),
            self.images.as_ref(),
        )
        .await;
        if content.is_empty() {
            return Ok(());
        }

        let nickname = match self
            .platform
            .group_member(event.group_id, &event.user_id)
            .await
        {
            Ok(member) => member.display_name(&event.user_id),
            Err(_) => event.user_id.clone(),
        };

        session
            .lock()
            .await
            .push_pending(ChatMessage::new(nickname, content));
        Ok(())
    }

    /// Abort all workers. Pending work is lost; on-disk state is current as
    /// of the last completed pipeline run.
    pub async fn shutdown(&self) {
        let mut groups = self.groups.lock().await;
        for (group_id, handle) in groups.drain() {
            handle.worker.abort();
            debug!("aborted worker for group {}", group_id);
        }
    }
}

async fn run_worker(session: SharedSession, platform: Arc<dyn ChatPlatform>, group_id: i64) {
    loop {
        let delay = rand::thread_rng().gen_range(POLL_MIN_SECS..POLL_MAX_SECS);
        tokio::time::sleep(Duration::from_secs_f64(delay)).await;
        drain_once(&session, platform.as_ref(), group_id).await;
    }
}

/// One worker tick: drain the pending batch, run the pipeline, send the
/// replies in order. Returns whether a batch was processed. Pipeline errors
/// drop the batch and keep the loop alive.
pub(crate) async fn drain_once(
    session: &SharedSession,
    platform: &dyn ChatPlatform,
    group_id: i64,
) -> bool {
    let mut guard = session.lock().await;
    if guard.pending.is_empty() {
        return false;
    }
    let batch: Vec<ChatMessage> = std::mem::take(&mut guard.pending);
    debug!("group {}: draining {} messages", group_id, batch.len());

    match guard.process_batch(&batch).await {
        Ok(replies) => {
            for reply in &replies {
                if let Err(e) = platform.send_to_group(group_id, reply).await {
                    error!("group {}: failed to send reply: {}", group_id, e);
                }
            }
        }
        Err(e) => {
            error!("group {}: pipeline failed, batch dropped: {}", group_id, e);
        }
    }
    true
}
