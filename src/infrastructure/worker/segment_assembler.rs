//! Segment Assembler - 分片组装
//!
//! 把分片按到达顺序拼成片段文件，交给 PlaybackScheduler 播放；
//! 流结束后把全部片段拼接成完整音频存入缓存。
//!
//! 每条消息一个构建状态机: Idle → Building → Idle | Finalizing → 移除。
//! 同一消息同一时刻最多一个构建者，并发请求只计数后返回。
//! 结束或取消的消息会留下关闭标记，迟到的分片和结束事件被丢弃。

use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::PlaybackScheduler;
use crate::application::ports::{AudioCachePort, ChunkConsumerPort};
use crate::domain::{AudioChunk, ContentKey, MessageKey, Segment, SegmentFile, StreamItem};
use crate::infrastructure::events::EventPublisher;
use crate::infrastructure::memory::MessageAudioBinding;

/// Assembler 配置
#[derive(Debug, Clone)]
pub struct SegmentAssemblerConfig {
    /// 多少个分片组成一个片段
    pub segment_threshold: usize,
    /// 超过该时间没有新分片的流视为结束
    pub idle_timeout: Duration,
    /// 片段文件目录
    pub work_dir: PathBuf,
    /// 片段文件扩展名
    pub audio_extension: String,
}

impl Default for SegmentAssemblerConfig {
    fn default() -> Self {
        Self {
            segment_threshold: 10,
            idle_timeout: Duration::from_secs(30),
            work_dir: PathBuf::from("data/segments"),
            audio_extension: "mp3".to_string(),
        }
    }
}

/// 关闭标记的保留时间
const CLOSED_RETENTION: Duration = Duration::from_secs(600);

/// 构建状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Idle,
    Building,
    Finalizing,
}

/// 流的结束方式
#[derive(Debug, Clone, PartialEq, Eq)]
enum Completion {
    Streaming,
    Ended,
    Failed(String),
}

/// build_segment 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// 本次调用执行了构建
    Built,
    /// 已有构建在进行，本次请求被合并
    Coalesced,
    /// 消息没有组装状态
    NotFound,
}

/// 单条消息的组装状态
struct AssemblyState {
    generation: u64,
    /// 片段文件名前缀，区分同一消息的多次组装
    file_prefix: String,
    pending: Vec<AudioChunk>,
    build: BuildState,
    coalesced: usize,
    segments: Vec<Segment>,
    next_index: usize,
    total_bytes: u64,
    chunk_count: usize,
    lost_chunks: usize,
    completion: Completion,
    last_chunk_at: Instant,
}

impl AssemblyState {
    fn new(message_id: &MessageKey, generation: u64) -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Self {
            generation,
            file_prefix: format!("{}-{}", message_id.file_stem(), &id[..8]),
            pending: Vec::new(),
            build: BuildState::Idle,
            coalesced: 0,
            segments: Vec::new(),
            next_index: 0,
            total_bytes: 0,
            chunk_count: 0,
            lost_chunks: 0,
            completion: Completion::Streaming,
            last_chunk_at: Instant::now(),
        }
    }

    /// Idle -> Building；正在构建时计入合并次数
    fn try_begin_build(&mut self) -> bool {
        match self.build {
            BuildState::Idle => {
                self.build = BuildState::Building;
                true
            }
            BuildState::Building => {
                self.coalesced += 1;
                false
            }
            BuildState::Finalizing => false,
        }
    }

    /// 构建者在持锁状态下决定下一步
    ///
    /// 缓冲区和结束标志都在这里重新检查，之后才会切回 Idle
    fn next_build_step(&mut self, threshold: usize, flush: bool) -> BuildStep {
        let finished = self.completion != Completion::Streaming;

        if !self.pending.is_empty() && (self.pending.len() >= threshold || flush || finished) {
            // 手动构建一次写出全部缓冲，其余情况每个片段最多 threshold 个分片
            let take = if flush {
                self.pending.len()
            } else {
                self.pending.len().min(threshold)
            };
            let chunks: Vec<AudioChunk> = self.pending.drain(..take).collect();
            let index = self.next_index;
            self.next_index += 1;
            return BuildStep::Write(SegmentJob {
                generation: self.generation,
                index,
                file_prefix: self.file_prefix.clone(),
                chunks,
            });
        }

        if finished {
            self.build = BuildState::Finalizing;
            return BuildStep::Finalize;
        }

        self.build = BuildState::Idle;
        BuildStep::Done
    }
}

struct SegmentJob {
    generation: u64,
    index: usize,
    file_prefix: String,
    chunks: Vec<AudioChunk>,
}

enum BuildStep {
    Write(SegmentJob),
    Finalize,
    Done,
}

/// 片段组装器
pub struct SegmentAssembler {
    config: SegmentAssemblerConfig,
    /// message_id -> AssemblyState
    states: DashMap<MessageKey, AssemblyState>,
    /// 已结束或取消的 message_id -> 关闭时间
    closed: DashMap<MessageKey, Instant>,
    scheduler: Arc<PlaybackScheduler>,
    cache: Arc<dyn AudioCachePort>,
    binding: Arc<MessageAudioBinding>,
    events: Arc<EventPublisher>,
    weak_self: Weak<Self>,
}

impl SegmentAssembler {
    pub fn new(
        config: SegmentAssemblerConfig,
        scheduler: Arc<PlaybackScheduler>,
        cache: Arc<dyn AudioCachePort>,
        binding: Arc<MessageAudioBinding>,
        events: Arc<EventPublisher>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            config,
            states: DashMap::new(),
            closed: DashMap::new(),
            scheduler,
            cache,
            binding,
            events,
            weak_self: weak_self.clone(),
        })
    }

    /// 清理片段目录中上次运行残留的文件，返回清理数量
    pub async fn sweep_work_dir(&self) -> std::io::Result<usize> {
        tokio::fs::create_dir_all(&self.config.work_dir).await?;

        let mut swept = 0;
        let mut read_dir = tokio::fs::read_dir(&self.config.work_dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            if entry.file_type().await?.is_file() {
                tokio::fs::remove_file(entry.path()).await?;
                swept += 1;
            }
        }

        if swept > 0 {
            tracing::info!(dir = %self.config.work_dir.display(), swept = swept, "Swept stale segment files");
        }
        Ok(swept)
    }

    /// 为即将到来的流预先建立组装状态，绑定到已打开的播放会话
    ///
    /// 会话被其它消息抢占后，该消息迟到的片段不会再打开新会话
    pub fn prepare(&self, message_id: &MessageKey, generation: u64) -> bool {
        self.closed.remove(message_id);
        let mut created = false;
        self.states.entry(message_id.clone()).or_insert_with(|| {
            created = true;
            AssemblyState::new(message_id, generation)
        });
        created
    }

    /// 手动构建：把当前缓冲的分片全部写成一个片段
    pub async fn build_segment(&self, message_id: &MessageKey) -> BuildOutcome {
        let key = self.binding.resolve(message_id);
        let started = match self.states.get_mut(&key) {
            Some(mut state) => state.try_begin_build().then(|| state.file_prefix.clone()),
            None => return BuildOutcome::NotFound,
        };
        let Some(file_prefix) = started else {
            tracing::debug!(message_id = %key, "Segment build already running, request coalesced");
            return BuildOutcome::Coalesced;
        };

        self.run_builds(key, file_prefix, true).await;
        BuildOutcome::Built
    }

    /// 取消消息的组装，丢弃缓冲的分片
    ///
    /// 之后到达的分片不会重新打开会话，直到再次 prepare
    pub fn cancel(&self, message_id: &MessageKey) -> bool {
        let key = self.binding.resolve(message_id);
        self.close(&key);
        match self.states.remove(&key) {
            Some((_, state)) => {
                tracing::info!(
                    message_id = %key,
                    pending_chunks = state.pending.len(),
                    segments = state.segments.len(),
                    "Assembly cancelled"
                );
                true
            }
            None => false,
        }
    }

    /// 把 from 下的组装状态迁移到 to（绑定晚于首个分片注册时）
    pub fn rebind(&self, from: &MessageKey, to: &MessageKey) -> bool {
        if from == to || self.states.contains_key(to) {
            return false;
        }
        match self.states.remove(from) {
            Some((_, state)) => {
                self.states.insert(to.clone(), state);
                tracing::debug!(from = %from, to = %to, "Assembly state rebound");
                true
            }
            None => false,
        }
    }

    /// 消息是否已结束或取消
    pub fn is_closed(&self, message_id: &MessageKey) -> bool {
        self.closed
            .get(message_id)
            .map(|closed_at| closed_at.elapsed() < CLOSED_RETENTION)
            .unwrap_or(false)
    }

    /// 记录关闭标记，传输层别名一并标记
    pub fn close(&self, message_id: &MessageKey) {
        let now = Instant::now();
        for alias in self.binding.aliases_of(message_id) {
            self.closed.insert(alias, now);
        }
        self.closed.insert(message_id.clone(), now);
    }

    pub fn is_assembling(&self, message_id: &MessageKey) -> bool {
        self.states.contains_key(&self.binding.resolve(message_id))
    }

    pub fn build_state(&self, message_id: &MessageKey) -> Option<BuildState> {
        self.states
            .get(&self.binding.resolve(message_id))
            .map(|state| state.build)
    }

    /// 被合并的构建请求次数
    pub fn coalesced_count(&self, message_id: &MessageKey) -> usize {
        self.states
            .get(&self.binding.resolve(message_id))
            .map(|state| state.coalesced)
            .unwrap_or(0)
    }

    /// 把超时未收到分片的流按正常结束处理，返回处理数量
    pub async fn expire_idle(&self) -> usize {
        self.closed
            .retain(|_, closed_at| closed_at.elapsed() < CLOSED_RETENTION);

        let expired: Vec<MessageKey> = self
            .states
            .iter()
            .filter(|state| {
                state.completion == Completion::Streaming
                    && state.last_chunk_at.elapsed() >= self.config.idle_timeout
            })
            .map(|state| state.key().clone())
            .collect();

        for key in &expired {
            tracing::warn!(
                message_id = %key,
                idle_timeout_ms = self.config.idle_timeout.as_millis() as u64,
                "Stream idle timeout, finalizing"
            );
            self.on_complete(key, Completion::Ended).await;
        }
        expired.len()
    }

    /// 空闲检测循环，token 取消后退出
    pub async fn run_idle_watchdog(&self, interval: Duration, shutdown: CancellationToken) {
        tracing::info!(interval_ms = interval.as_millis() as u64, "Idle watchdog started");
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.expire_idle().await;
                }
            }
        }
        tracing::info!("Idle watchdog stopped");
    }

    async fn on_chunk(&self, key: &MessageKey, chunk: AudioChunk) {
        if chunk.is_empty() {
            tracing::debug!(message_id = %key, ordinal = chunk.ordinal, "Skipping empty chunk");
            return;
        }

        if !self.states.contains_key(key) {
            if self.is_closed(key) {
                tracing::debug!(
                    message_id = %key,
                    ordinal = chunk.ordinal,
                    "Chunk for closed message dropped"
                );
                return;
            }
            let generation = self.scheduler.open_stream(key).await;
            self.states
                .entry(key.clone())
                .or_insert_with(|| AssemblyState::new(key, generation));
            tracing::debug!(message_id = %key, generation = generation, "Assembly started");
        }

        let start = match self.states.get_mut(key) {
            Some(mut state) => {
                if state.completion != Completion::Streaming {
                    tracing::warn!(
                        message_id = %key,
                        ordinal = chunk.ordinal,
                        "Chunk arrived after stream end, dropped"
                    );
                    return;
                }
                state.total_bytes += chunk.len() as u64;
                state.chunk_count += 1;
                state.last_chunk_at = Instant::now();
                state.pending.push(chunk);
                (state.pending.len() >= self.config.segment_threshold && state.try_begin_build())
                    .then(|| state.file_prefix.clone())
            }
            None => None,
        };

        if let Some(file_prefix) = start {
            self.spawn_builds(key.clone(), file_prefix);
        }
    }

    async fn on_complete(&self, key: &MessageKey, completion: Completion) {
        let start = match self.states.get_mut(key) {
            Some(mut state) => {
                if state.completion == Completion::Streaming {
                    state.completion = completion;
                }
                state.try_begin_build().then(|| state.file_prefix.clone())
            }
            None => {
                if self.is_closed(key) {
                    tracing::debug!(message_id = %key, "Completion for closed message ignored");
                    return;
                }
                let reason = match completion {
                    Completion::Failed(reason) => reason,
                    _ => "stream ended without audio".to_string(),
                };
                self.scheduler.fail_pending(key, &reason).await;
                self.close(key);
                self.binding.unbind_message(key);
                return;
            }
        };

        if let Some(file_prefix) = start {
            self.spawn_builds(key.clone(), file_prefix);
        }
    }

    fn spawn_builds(&self, key: MessageKey, file_prefix: String) {
        let Some(this) = self.weak_self.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            this.run_builds(key, file_prefix, false).await;
        });
    }

    /// 构建循环，只由取得 Building 状态的调用方运行
    ///
    /// file_prefix 标识启动时的组装状态；状态被取消或替换后构建者退出
    async fn run_builds(&self, key: MessageKey, file_prefix: String, flush: bool) {
        let mut flush = flush;
        loop {
            let step = match self.states.get_mut(&key) {
                Some(mut state) if state.file_prefix == file_prefix => {
                    state.next_build_step(self.config.segment_threshold, flush)
                }
                _ => {
                    tracing::debug!(message_id = %key, file_prefix = %file_prefix, "Assembly replaced, builder exits");
                    BuildStep::Done
                }
            };
            flush = false;

            match step {
                BuildStep::Write(job) => self.write_segment(&key, job).await,
                BuildStep::Finalize => {
                    self.finalize(&key, &file_prefix).await;
                    return;
                }
                BuildStep::Done => return,
            }
        }
    }

    async fn write_segment(&self, key: &MessageKey, job: SegmentJob) {
        let chunk_count = job.chunks.len();
        let bytes: Vec<u8> = job.chunks.into_iter().flat_map(|chunk| chunk.data).collect();
        let size_bytes = bytes.len() as u64;
        let file_name = format!(
            "{}-segment_{:04}.{}",
            job.file_prefix, job.index, self.config.audio_extension
        );

        let path = match write_atomically(&self.config.work_dir, &file_name, &bytes).await {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(
                    message_id = %key,
                    index = job.index,
                    chunk_count = chunk_count,
                    error = %e,
                    "Failed to write segment, chunks lost"
                );
                if let Some(mut state) = self
                    .states
                    .get_mut(key)
                    .filter(|state| state.file_prefix == job.file_prefix)
                {
                    state.lost_chunks += chunk_count;
                }
                return;
            }
        };

        let segment = Segment {
            message_id: key.clone(),
            index: job.index,
            chunk_count,
            size_bytes,
            file: Arc::new(SegmentFile::new(path)),
        };

        match self
            .states
            .get_mut(key)
            .filter(|state| state.file_prefix == job.file_prefix)
        {
            Some(mut state) => state.segments.push(segment.clone()),
            None => {
                tracing::debug!(message_id = %key, index = job.index, "Assembly cancelled during segment write");
                return;
            }
        }

        let appended = self.scheduler.append_segment(job.generation, &segment).await;
        tracing::debug!(
            message_id = %key,
            index = job.index,
            chunk_count = chunk_count,
            size_bytes = size_bytes,
            appended = appended,
            "Segment built"
        );
    }

    /// 结束组装：缓存完整音频，标记播放列表输入结束
    async fn finalize(&self, key: &MessageKey, file_prefix: &str) {
        let Some((generation, segments, completion, lost_chunks, total_bytes)) = self
            .states
            .get(key)
            .filter(|state| state.file_prefix == file_prefix)
            .map(|state| {
                (
                    state.generation,
                    state.segments.clone(),
                    state.completion.clone(),
                    state.lost_chunks,
                    state.total_bytes,
                )
            })
        else {
            return;
        };

        let mut cached = false;
        if segments.is_empty() {
            let reason = match &completion {
                Completion::Failed(reason) => reason.clone(),
                _ if lost_chunks > 0 => "all segment writes failed".to_string(),
                _ => "stream ended without audio".to_string(),
            };
            if !self.scheduler.fail(generation, &reason).await {
                self.events.publish_failed(generation, key, &reason);
            }
        } else {
            match (&completion, self.binding.content_key(key)) {
                (Completion::Ended, Some(content_key)) if lost_chunks == 0 => {
                    cached = self.cache_full_audio(key, &content_key, &segments).await;
                }
                (Completion::Ended, None) => {
                    tracing::debug!(message_id = %key, "No content key bound, audio not cached");
                }
                (Completion::Ended, Some(_)) => {
                    tracing::warn!(
                        message_id = %key,
                        lost_chunks = lost_chunks,
                        "Incomplete audio, not caching"
                    );
                }
                (Completion::Failed(reason), _) => {
                    tracing::warn!(message_id = %key, reason = %reason, "Stream failed upstream, not caching");
                }
                (Completion::Streaming, _) => {}
            }
            self.scheduler.finish_input(generation).await;
        }

        tracing::info!(
            message_id = %key,
            generation = generation,
            segments = segments.len(),
            total_bytes = total_bytes,
            cached = cached,
            "Stream finalized"
        );
        // 关闭标记先于事件，收到 AssemblyFinished 后迟到的事件一定被丢弃
        self.states
            .remove_if(key, |_, state| state.file_prefix == file_prefix);
        self.close(key);
        self.binding.unbind_message(key);

        self.events
            .publish_assembly_finished(key, segments.len(), total_bytes, cached);
    }

    /// 拼接全部片段并存入缓存
    async fn cache_full_audio(
        &self,
        key: &MessageKey,
        content_key: &ContentKey,
        segments: &[Segment],
    ) -> bool {
        let tmp_path = self.config.work_dir.join(format!(
            ".full-{}.{}",
            Uuid::new_v4(),
            self.config.audio_extension
        ));

        let result = async {
            concat_segments(&tmp_path, segments).await?;
            self.cache
                .store(content_key, &tmp_path)
                .await
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
        }
        .await;

        let _ = tokio::fs::remove_file(&tmp_path).await;

        match result {
            Ok(path) => {
                tracing::debug!(message_id = %key, key = %content_key, path = %path.display(), "Full audio cached");
                true
            }
            Err(e) => {
                tracing::warn!(message_id = %key, key = %content_key, error = %e, "Failed to cache full audio");
                false
            }
        }
    }
}

#[async_trait]
impl ChunkConsumerPort for SegmentAssembler {
    async fn accept(&self, message_id: &MessageKey, item: StreamItem) {
        let key = self.binding.resolve(message_id);
        if key != *message_id {
            self.rebind(message_id, &key);
        }

        match item {
            StreamItem::Chunk(chunk) => self.on_chunk(&key, chunk).await,
            StreamItem::End => self.on_complete(&key, Completion::Ended).await,
            StreamItem::Error(reason) => {
                tracing::warn!(message_id = %key, reason = %reason, "Upstream stream error");
                self.on_complete(&key, Completion::Failed(reason)).await;
            }
        }
    }
}

/// 写临时文件再 rename，片段文件一旦可见就是完整的
async fn write_atomically(dir: &Path, file_name: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let tmp_path = dir.join(format!(".{}.tmp", file_name));
    let path = dir.join(file_name);

    tokio::fs::write(&tmp_path, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }
    Ok(path)
}

async fn concat_segments(target: &Path, segments: &[Segment]) -> std::io::Result<()> {
    let mut out = tokio::fs::File::create(target).await?;
    for segment in segments {
        let mut input = tokio::fs::File::open(segment.path()).await?;
        tokio::io::copy(&mut input, &mut out).await?;
    }
    out.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PlaybackState;
    use crate::infrastructure::adapters::device::FakeAudioDevice;
    use crate::infrastructure::events::PlaybackEvent;
    use crate::infrastructure::persistence::{FileAudioCache, FileCacheConfig};
    use tempfile::{tempdir, TempDir};
    use tokio::sync::broadcast;

    struct Harness {
        _dir: TempDir,
        assembler: Arc<SegmentAssembler>,
        cache: Arc<FileAudioCache>,
        device: Arc<FakeAudioDevice>,
        binding: Arc<MessageAudioBinding>,
        events: Arc<EventPublisher>,
    }

    async fn harness_with(
        threshold: usize,
        work_dir: Option<PathBuf>,
        play_delay: Duration,
    ) -> Harness {
        let dir = tempdir().unwrap();
        let device = FakeAudioDevice::new(play_delay).arc();
        let cache = FileAudioCache::open(FileCacheConfig {
            dir: dir.path().join("cache"),
            evict_on_store: None,
        })
        .await
        .unwrap()
        .arc();
        let events = EventPublisher::new().arc();
        let binding = MessageAudioBinding::new().arc();
        let scheduler = PlaybackScheduler::new(device.clone(), events.clone()).arc();
        let assembler = SegmentAssembler::new(
            SegmentAssemblerConfig {
                segment_threshold: threshold,
                idle_timeout: Duration::from_millis(50),
                work_dir: work_dir.unwrap_or_else(|| dir.path().join("segments")),
                audio_extension: "mp3".to_string(),
            },
            scheduler,
            cache.clone(),
            binding.clone(),
            events.clone(),
        );
        Harness {
            _dir: dir,
            assembler,
            cache,
            device,
            binding,
            events,
        }
    }

    async fn harness(threshold: usize) -> Harness {
        harness_with(threshold, None, Duration::ZERO).await
    }

    fn chunk(message_id: &MessageKey, ordinal: u64, data: Vec<u8>) -> StreamItem {
        StreamItem::Chunk(AudioChunk {
            message_id: message_id.clone(),
            ordinal,
            data,
        })
    }

    async fn next_matching<F>(rx: &mut broadcast::Receiver<PlaybackEvent>, f: F) -> PlaybackEvent
    where
        F: Fn(&PlaybackEvent) -> bool,
    {
        let wait = async {
            loop {
                let event = rx.recv().await.unwrap();
                if f(&event) {
                    return event;
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(2), wait)
            .await
            .expect("timed out waiting for event")
    }

    fn is_finished(event: &PlaybackEvent) -> bool {
        matches!(event, PlaybackEvent::AssemblyFinished { .. })
    }

    #[tokio::test]
    async fn test_threshold_splits_segments_and_caches_full_audio() {
        let h = harness(10).await;
        let mut rx = h.events.subscribe();
        let message_id = MessageKey::new("m1");
        let content_key = ContentKey::compute("twelve chunks", None);
        h.binding.set_content_key(&message_id, content_key.clone());

        let mut expected = Vec::new();
        for i in 0..12u8 {
            let data = vec![i; 256];
            expected.extend_from_slice(&data);
            h.assembler.accept(&message_id, chunk(&message_id, i as u64, data)).await;
        }
        h.assembler.accept(&message_id, StreamItem::End).await;

        let finished = next_matching(&mut rx, is_finished).await;
        assert_eq!(
            finished,
            PlaybackEvent::AssemblyFinished {
                message_id: message_id.clone(),
                segment_count: 2,
                total_bytes: 3072,
                cached: true,
            }
        );

        let cached = h.cache.lookup(&content_key).await.unwrap();
        assert_eq!(std::fs::read(cached).unwrap(), expected);
        assert!(!h.assembler.is_assembling(&message_id));
    }

    #[tokio::test]
    async fn test_concurrent_builds_are_coalesced() {
        let h = harness(100).await;
        let message_id = MessageKey::new("m1");
        for i in 0..5u8 {
            h.assembler.accept(&message_id, chunk(&message_id, i as u64, vec![i; 64])).await;
        }

        let (first, second) = tokio::join!(
            h.assembler.build_segment(&message_id),
            h.assembler.build_segment(&message_id)
        );

        let mut outcomes = vec![first, second];
        outcomes.sort_by_key(|outcome| *outcome as u8);
        assert_eq!(outcomes, vec![BuildOutcome::Built, BuildOutcome::Coalesced]);
        assert_eq!(h.assembler.coalesced_count(&message_id), 1);
        assert_eq!(h.assembler.build_state(&message_id), Some(BuildState::Idle));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.device.played().len(), 1);
        assert_eq!(h.device.played_bytes().len(), 5 * 64);
    }

    #[tokio::test]
    async fn test_manual_build_without_state() {
        let h = harness(10).await;
        assert_eq!(
            h.assembler.build_segment(&MessageKey::new("unknown")).await,
            BuildOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_upstream_error_plays_but_does_not_cache() {
        let h = harness(2).await;
        let mut rx = h.events.subscribe();
        let message_id = MessageKey::new("m1");
        let content_key = ContentKey::compute("partial", None);
        h.binding.set_content_key(&message_id, content_key.clone());

        for i in 0..3u8 {
            h.assembler.accept(&message_id, chunk(&message_id, i as u64, vec![i; 8])).await;
        }
        h.assembler
            .accept(&message_id, StreamItem::Error("upstream 500".to_string()))
            .await;

        match next_matching(&mut rx, is_finished).await {
            PlaybackEvent::AssemblyFinished {
                cached,
                total_bytes,
                ..
            } => {
                assert!(!cached);
                assert_eq!(total_bytes, 24);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(h.cache.lookup(&content_key).await.is_none());
    }

    #[tokio::test]
    async fn test_end_without_chunks_surfaces_failure() {
        let h = harness(10).await;
        let mut rx = h.events.subscribe();
        let message_id = MessageKey::new("empty");

        h.assembler.accept(&message_id, StreamItem::End).await;

        let failed = next_matching(&mut rx, |event| {
            matches!(event, PlaybackEvent::PlaybackFailed { .. })
        })
        .await;
        match failed {
            PlaybackEvent::PlaybackFailed { message_id: id, .. } => assert_eq!(id, message_id),
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(h.cache.stats().await.unwrap().indexed_entries, 0);
    }

    #[tokio::test]
    async fn test_cancel_drops_pending_chunks() {
        let h = harness(10).await;
        let message_id = MessageKey::new("m1");
        for i in 0..3u8 {
            h.assembler.accept(&message_id, chunk(&message_id, i as u64, vec![i; 8])).await;
        }

        assert!(h.assembler.cancel(&message_id));
        assert!(!h.assembler.cancel(&message_id));
        assert!(!h.assembler.is_assembling(&message_id));
    }

    #[tokio::test]
    async fn test_idle_stream_is_finalized() {
        let h = harness(10).await;
        let mut rx = h.events.subscribe();
        let message_id = MessageKey::new("m1");
        let content_key = ContentKey::compute("idle", None);
        h.binding.set_content_key(&message_id, content_key.clone());

        h.assembler.accept(&message_id, chunk(&message_id, 0, vec![1; 16])).await;
        assert_eq!(h.assembler.expire_idle().await, 0);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(h.assembler.expire_idle().await, 1);

        match next_matching(&mut rx, is_finished).await {
            PlaybackEvent::AssemblyFinished { cached, .. } => assert!(cached),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(h.cache.lookup(&content_key).await.is_some());
    }

    #[tokio::test]
    async fn test_failed_segment_write_is_not_cached() {
        let blocker = tempdir().unwrap();
        let not_a_dir = blocker.path().join("file");
        std::fs::write(&not_a_dir, b"x").unwrap();

        let h = harness_with(10, Some(not_a_dir), Duration::ZERO).await;
        let mut rx = h.events.subscribe();
        let message_id = MessageKey::new("m1");
        let content_key = ContentKey::compute("lost", None);
        h.binding.set_content_key(&message_id, content_key.clone());

        h.assembler.accept(&message_id, chunk(&message_id, 0, vec![1; 16])).await;
        h.assembler.accept(&message_id, StreamItem::End).await;

        next_matching(&mut rx, |event| {
            matches!(event, PlaybackEvent::PlaybackFailed { .. })
        })
        .await;
        assert!(h.cache.lookup(&content_key).await.is_none());
    }

    #[tokio::test]
    async fn test_prepared_stream_keeps_its_generation() {
        let h = harness(1).await;
        let a = MessageKey::new("a");
        let b = MessageKey::new("b");

        let gen_a = h.assembler.scheduler.open_stream(&a).await;
        assert!(h.assembler.prepare(&a, gen_a));
        assert!(!h.assembler.prepare(&a, gen_a));
        h.assembler.scheduler.open_stream(&b).await;

        // a 的迟到分片不能抢占 b 的会话
        h.assembler.accept(&a, chunk(&a, 0, vec![1; 8])).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(
            h.assembler.scheduler.active_message().await.map(|(id, _)| id),
            Some(b)
        );
        assert!(h.device.played().is_empty());
    }

    #[tokio::test]
    async fn test_state_follows_late_binding() {
        let h = harness(10).await;
        let raw = MessageKey::new("chatcmpl-1");
        let logical = MessageKey::new("msg-1");

        h.assembler.accept(&raw, chunk(&raw, 0, vec![1; 8])).await;
        h.binding.bind(&raw, &logical);
        h.assembler.accept(&raw, chunk(&raw, 1, vec![2; 8])).await;

        assert!(h.assembler.is_assembling(&logical));
        assert!(h.assembler.states.get(&raw).is_none());
        assert_eq!(
            h.assembler.states.get(&logical).map(|state| state.chunk_count),
            Some(2)
        );
    }

    #[tokio::test]
    async fn test_late_chunk_after_finalize_does_not_preempt() {
        let h = harness(10).await;
        let mut rx = h.events.subscribe();
        let a = MessageKey::new("a");
        let b = MessageKey::new("b");

        h.assembler.accept(&a, chunk(&a, 0, vec![1; 8])).await;
        h.assembler.accept(&a, StreamItem::End).await;
        next_matching(&mut rx, is_finished).await;
        assert!(h.assembler.is_closed(&a));

        let gen_b = h.assembler.scheduler.open_stream(&b).await;
        h.assembler.accept(&a, chunk(&a, 1, vec![2; 8])).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(
            h.assembler.scheduler.active_message().await,
            Some((b, gen_b))
        );
        assert!(!h.assembler.is_assembling(&a));
        assert!(h.device.played_bytes().iter().all(|byte| *byte == 1));
    }

    #[tokio::test]
    async fn test_late_chunk_through_transport_alias_is_dropped() {
        let h = harness(10).await;
        let mut rx = h.events.subscribe();
        let raw = MessageKey::new("chatcmpl-1");
        let logical = MessageKey::new("msg-1");
        h.binding.bind(&raw, &logical);

        h.assembler.accept(&raw, chunk(&raw, 0, vec![1; 8])).await;
        h.assembler.accept(&raw, StreamItem::End).await;
        next_matching(&mut rx, is_finished).await;

        // 绑定已解除，迟到分片按传输层 ID 到达
        assert_eq!(h.binding.resolve(&raw), raw);
        h.assembler.accept(&raw, chunk(&raw, 1, vec![2; 8])).await;
        assert!(!h.assembler.is_assembling(&raw));
    }

    #[tokio::test]
    async fn test_duplicate_end_keeps_live_playback() {
        let h = harness_with(10, None, Duration::from_secs(30)).await;
        let mut rx = h.events.subscribe();
        let message_id = MessageKey::new("m1");

        h.assembler.accept(&message_id, chunk(&message_id, 0, vec![1; 8])).await;
        h.assembler.accept(&message_id, StreamItem::End).await;
        next_matching(&mut rx, is_finished).await;
        for _ in 0..200 {
            if h.assembler.scheduler.state().await == PlaybackState::Playing {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(h.assembler.scheduler.state().await, PlaybackState::Playing);

        h.assembler.accept(&message_id, StreamItem::End).await;
        h.assembler
            .accept(&message_id, StreamItem::Error("late error".to_string()))
            .await;

        assert_eq!(h.assembler.scheduler.state().await, PlaybackState::Playing);
        let failures = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|event| matches!(event, PlaybackEvent::PlaybackFailed { .. }))
            .count();
        assert_eq!(failures, 0);
    }

    #[tokio::test]
    async fn test_prepare_reopens_closed_message() {
        let h = harness(10).await;
        let message_id = MessageKey::new("m1");

        h.assembler.accept(&message_id, chunk(&message_id, 0, vec![1; 8])).await;
        assert!(h.assembler.cancel(&message_id));
        h.assembler.accept(&message_id, chunk(&message_id, 1, vec![2; 8])).await;
        assert!(!h.assembler.is_assembling(&message_id));

        let generation = h.assembler.scheduler.open_stream(&message_id).await;
        assert!(h.assembler.prepare(&message_id, generation));
        assert!(!h.assembler.is_closed(&message_id));
        h.assembler.accept(&message_id, chunk(&message_id, 2, vec![3; 8])).await;
        assert_eq!(
            h.assembler.states.get(&message_id).map(|state| state.chunk_count),
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_stale_builder_leaves_new_assembly_alone() {
        let h = harness(10).await;
        let message_id = MessageKey::new("m1");

        h.assembler.prepare(&message_id, 1);
        let stale_prefix = h
            .assembler
            .states
            .get(&message_id)
            .map(|state| state.file_prefix.clone())
            .unwrap();
        h.assembler.cancel(&message_id);

        h.assembler.prepare(&message_id, 2);
        for i in 0..3u8 {
            h.assembler.accept(&message_id, chunk(&message_id, i as u64, vec![i; 8])).await;
        }
        if let Some(mut state) = h.assembler.states.get_mut(&message_id) {
            state.build = BuildState::Building;
        }

        h.assembler.run_builds(message_id.clone(), stale_prefix, true).await;

        let (pending, build, segments) = h
            .assembler
            .states
            .get(&message_id)
            .map(|state| (state.pending.len(), state.build, state.segments.len()))
            .unwrap();
        assert_eq!(pending, 3);
        assert_eq!(build, BuildState::Building);
        assert_eq!(segments, 0);
        assert!(h.device.played().is_empty());
    }
}
