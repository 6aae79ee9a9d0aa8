//! Playback Scheduler - 播放调度
//!
//! 同一时刻只有一个活动会话。新会话开始前，旧会话的播放任务
//! 先被取消并 join，状态落到 Stopped。

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, MutexGuard};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{AudioDevicePort, CachePin, DeviceError};
use crate::domain::{MessageKey, PlaybackState, Segment, SegmentFile};
use crate::infrastructure::events::EventPublisher;

/// 播放列表条目
#[derive(Clone)]
enum PlaylistItem {
    Cached(PathBuf),
    Segment(Arc<SegmentFile>),
}

impl PlaylistItem {
    fn path(&self) -> &Path {
        match self {
            PlaylistItem::Cached(path) => path,
            PlaylistItem::Segment(file) => file.path(),
        }
    }
}

/// 会话播放列表
struct Playlist {
    items: Vec<PlaylistItem>,
    position: usize,
    input_complete: bool,
    state: PlaybackState,
    /// 播放缓存文件期间固定缓存条目
    pin: Option<CachePin>,
}

/// 会话共享状态（调度器和播放任务共同持有）
struct SessionShared {
    generation: u64,
    message_id: MessageKey,
    playlist: std::sync::Mutex<Playlist>,
    wake: Notify,
    cancel: CancellationToken,
}

impl SessionShared {
    fn new(generation: u64, message_id: &MessageKey) -> Self {
        Self {
            generation,
            message_id: message_id.clone(),
            playlist: std::sync::Mutex::new(Playlist {
                items: Vec::new(),
                position: 0,
                input_complete: false,
                state: PlaybackState::Idle,
                pin: None,
            }),
            wake: Notify::new(),
            cancel: CancellationToken::new(),
        }
    }

    fn playlist(&self) -> MutexGuard<'_, Playlist> {
        self.playlist
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn state(&self) -> PlaybackState {
        self.playlist().state
    }

    /// 状态迁移，非法迁移返回 false
    ///
    /// 事件在持锁时发布，保证事件顺序与状态顺序一致。
    /// 进入终止状态时释放播放列表和缓存固定。
    fn transition(&self, next: PlaybackState, events: &EventPublisher) -> bool {
        let mut playlist = self.playlist();
        Self::transition_locked(&mut playlist, self.generation, &self.message_id, next, events)
    }

    fn transition_locked(
        playlist: &mut Playlist,
        generation: u64,
        message_id: &MessageKey,
        next: PlaybackState,
        events: &EventPublisher,
    ) -> bool {
        if !playlist.state.can_transition_to(next) {
            return false;
        }
        playlist.state = next;
        if next.is_terminal() {
            playlist.items.clear();
            playlist.pin = None;
        }

        tracing::debug!(
            generation = generation,
            message_id = %message_id,
            state = %next,
            "Playback state changed"
        );
        events.publish_state(generation, message_id, next);
        true
    }
}

struct ActiveSession {
    shared: Arc<SessionShared>,
    player: JoinHandle<()>,
}

/// 播放任务的下一步
enum PlayerStep {
    Play(PlaylistItem),
    Wait,
    Exit,
}

/// 播放调度器
pub struct PlaybackScheduler {
    device: Arc<dyn AudioDevicePort>,
    events: Arc<EventPublisher>,
    active: Mutex<Option<ActiveSession>>,
    generation: AtomicU64,
}

impl PlaybackScheduler {
    pub fn new(device: Arc<dyn AudioDevicePort>, events: Arc<EventPublisher>) -> Self {
        Self {
            device,
            events,
            active: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// 播放缓存文件
    ///
    /// 停止上一个会话，新会话的播放列表只有这一个文件。
    /// pin 由调用方在 lookup 之前取得，会话结束时释放
    pub async fn play_cached(&self, message_id: &MessageKey, path: PathBuf, pin: CachePin) -> u64 {
        let mut active = self.active.lock().await;
        self.stop_active(&mut active).await;

        let generation = self.next_generation();
        tracing::info!(generation = generation, message_id = %message_id, key = %pin.key(), "Playing cached audio");
        let shared = Arc::new(SessionShared::new(generation, message_id));
        {
            let mut playlist = shared.playlist();
            playlist.items.push(PlaylistItem::Cached(path));
            playlist.input_complete = true;
            playlist.pin = Some(pin);
            SessionShared::transition_locked(
                &mut playlist,
                generation,
                message_id,
                PlaybackState::Loading,
                &self.events,
            );
        }

        *active = Some(self.start_session(shared));
        generation
    }

    /// 打开流式会话，返回会话 generation
    ///
    /// 同一消息的会话尚未结束时复用该会话
    pub async fn open_stream(&self, message_id: &MessageKey) -> u64 {
        let mut active = self.active.lock().await;
        if let Some(session) = active.as_ref() {
            if session.shared.message_id == *message_id && !session.shared.state().is_terminal() {
                return session.shared.generation;
            }
        }
        self.stop_active(&mut active).await;

        let generation = self.next_generation();
        let shared = Arc::new(SessionShared::new(generation, message_id));
        shared.transition(PlaybackState::Loading, &self.events);

        tracing::info!(generation = generation, message_id = %message_id, "Streaming session opened");
        *active = Some(self.start_session(shared));
        generation
    }

    /// 追加片段到播放列表末尾
    ///
    /// generation 过期或会话已结束时丢弃片段并返回 false
    pub async fn append_segment(&self, generation: u64, segment: &Segment) -> bool {
        let active = self.active.lock().await;
        let Some(session) = active
            .as_ref()
            .filter(|session| session.shared.generation == generation)
        else {
            tracing::debug!(
                generation = generation,
                message_id = %segment.message_id,
                index = segment.index,
                "Discarding segment for stale session"
            );
            return false;
        };

        {
            let mut playlist = session.shared.playlist();
            if playlist.state.is_terminal() || playlist.input_complete {
                return false;
            }
            playlist.items.push(PlaylistItem::Segment(segment.file.clone()));
        }

        self.events.publish_segment_appended(
            generation,
            &segment.message_id,
            segment.index,
            segment.size_bytes,
        );
        session.shared.wake.notify_one();
        true
    }

    /// 标记不会再有新片段，最后一个片段播完后进入 Completed
    pub async fn finish_input(&self, generation: u64) -> bool {
        let active = self.active.lock().await;
        let Some(session) = active
            .as_ref()
            .filter(|session| session.shared.generation == generation)
        else {
            return false;
        };

        session.shared.playlist().input_complete = true;
        session.shared.wake.notify_one();
        true
    }

    /// 会话失败：Stopped + 一次 PlaybackFailed
    pub async fn fail(&self, generation: u64, reason: &str) -> bool {
        let mut active = self.active.lock().await;
        let message_id = match active.as_ref() {
            Some(session)
                if session.shared.generation == generation
                    && !session.shared.state().is_terminal() =>
            {
                session.shared.message_id.clone()
            }
            _ => return false,
        };

        self.stop_active(&mut active).await;
        tracing::warn!(generation = generation, message_id = %message_id, reason = %reason, "Playback failed");
        self.events.publish_failed(generation, &message_id, reason);
        true
    }

    /// 消息在没有任何音频的情况下结束
    ///
    /// 只有仍在 Loading 且从未收到条目的会话才会失败；
    /// 已经有音频的会话保持不变
    pub async fn fail_pending(&self, message_id: &MessageKey, reason: &str) {
        let session = {
            let active = self.active.lock().await;
            active
                .as_ref()
                .filter(|session| session.shared.message_id == *message_id)
                .map(|session| {
                    let playlist = session.shared.playlist();
                    let waiting =
                        playlist.state == PlaybackState::Loading && playlist.items.is_empty();
                    (session.shared.generation, waiting)
                })
        };

        match session {
            Some((generation, false)) => {
                tracing::debug!(
                    generation = generation,
                    message_id = %message_id,
                    "Session already has audio, failure ignored"
                );
            }
            Some((generation, true)) if self.fail(generation, reason).await => {}
            _ => {
                tracing::warn!(message_id = %message_id, reason = %reason, "Stream produced no audio");
                self.events.publish_failed(0, message_id, reason);
            }
        }
    }

    /// 停止当前会话（幂等）
    pub async fn stop(&self) {
        let mut active = self.active.lock().await;
        self.stop_active(&mut active).await;
    }

    pub async fn state(&self) -> PlaybackState {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|session| session.shared.state())
            .unwrap_or_default()
    }

    /// 当前会话的消息和 generation
    pub async fn active_message(&self) -> Option<(MessageKey, u64)> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|session| (session.shared.message_id.clone(), session.shared.generation))
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn start_session(&self, shared: Arc<SessionShared>) -> ActiveSession {
        let player = tokio::spawn(run_player(
            shared.clone(),
            self.device.clone(),
            self.events.clone(),
        ));
        ActiveSession { shared, player }
    }

    /// 取消并 join 当前会话的播放任务
    async fn stop_active(&self, active: &mut Option<ActiveSession>) {
        let Some(session) = active.take() else {
            return;
        };

        session.shared.cancel.cancel();
        if !session.shared.state().is_terminal() {
            self.device.stop().await;
        }
        if let Err(e) = session.player.await {
            tracing::error!(generation = session.shared.generation, error = %e, "Player task panicked");
        }

        if session.shared.transition(PlaybackState::Stopped, &self.events) {
            tracing::info!(
                generation = session.shared.generation,
                message_id = %session.shared.message_id,
                "Playback session stopped"
            );
        }
    }
}

/// 播放任务：按顺序播放列表中的条目，没有新条目时等待唤醒
async fn run_player(
    shared: Arc<SessionShared>,
    device: Arc<dyn AudioDevicePort>,
    events: Arc<EventPublisher>,
) {
    loop {
        let step = {
            let mut playlist = shared.playlist();
            if playlist.state.is_terminal() {
                PlayerStep::Exit
            } else if let Some(item) = playlist.items.get(playlist.position).cloned() {
                if playlist.state == PlaybackState::Loading {
                    SessionShared::transition_locked(
                        &mut playlist,
                        shared.generation,
                        &shared.message_id,
                        PlaybackState::Playing,
                        &events,
                    );
                }
                PlayerStep::Play(item)
            } else if playlist.input_complete {
                // 没有播放过任何条目的会话不算完成
                let next = if playlist.state == PlaybackState::Playing {
                    PlaybackState::Completed
                } else {
                    PlaybackState::Stopped
                };
                SessionShared::transition_locked(
                    &mut playlist,
                    shared.generation,
                    &shared.message_id,
                    next,
                    &events,
                );
                PlayerStep::Exit
            } else {
                PlayerStep::Wait
            }
        };

        match step {
            PlayerStep::Exit => return,
            PlayerStep::Wait => {
                tokio::select! {
                    biased;
                    _ = shared.cancel.cancelled() => return,
                    _ = shared.wake.notified() => {}
                }
            }
            PlayerStep::Play(item) => {
                let result = tokio::select! {
                    biased;
                    _ = shared.cancel.cancelled() => return,
                    result = device.play(item.path()) => result,
                };
                drop(item);

                match result {
                    Ok(()) => shared.playlist().position += 1,
                    Err(DeviceError::Interrupted) => {
                        if !shared.cancel.is_cancelled() {
                            shared.transition(PlaybackState::Stopped, &events);
                        }
                        return;
                    }
                    Err(e) => {
                        tracing::error!(
                            generation = shared.generation,
                            message_id = %shared.message_id,
                            device = device.name(),
                            error = %e,
                            "Audio device failed"
                        );
                        if shared.transition(PlaybackState::Stopped, &events) {
                            events.publish_failed(shared.generation, &shared.message_id, &e.to_string());
                        }
                        if let Err(e) = device.reset().await {
                            tracing::error!(error = %e, "Failed to reset audio device");
                        }
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{AudioCachePort, EvictionPolicy};
    use crate::domain::ContentKey;
    use crate::infrastructure::adapters::device::FakeAudioDevice;
    use crate::infrastructure::events::PlaybackEvent;
    use crate::infrastructure::persistence::{FileAudioCache, FileCacheConfig};
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};
    use tokio::sync::broadcast;

    struct Harness {
        dir: TempDir,
        device: Arc<FakeAudioDevice>,
        cache: Arc<FileAudioCache>,
        events: Arc<EventPublisher>,
        scheduler: PlaybackScheduler,
    }

    async fn harness(play_delay: Duration) -> Harness {
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
        let scheduler = PlaybackScheduler::new(device.clone(), events.clone());
        Harness {
            dir,
            device,
            cache,
            events,
            scheduler,
        }
    }

    fn segment(dir: &TempDir, message_id: &MessageKey, index: usize, bytes: &[u8]) -> Segment {
        let path = dir.path().join(format!("{}_{}.mp3", message_id.file_stem(), index));
        std::fs::write(&path, bytes).unwrap();
        Segment {
            message_id: message_id.clone(),
            index,
            chunk_count: 1,
            size_bytes: bytes.len() as u64,
            file: Arc::new(SegmentFile::new(path)),
        }
    }

    async fn wait_for_state(scheduler: &PlaybackScheduler, state: PlaybackState) {
        for _ in 0..400 {
            if scheduler.state().await == state {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {}", state);
    }

    fn drain_states(rx: &mut broadcast::Receiver<PlaybackEvent>) -> Vec<(u64, PlaybackState)> {
        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let PlaybackEvent::StateChanged {
                generation, state, ..
            } = event
            {
                states.push((generation, state));
            }
        }
        states
    }

    #[tokio::test]
    async fn test_play_cached_goes_loading_playing_completed() {
        let h = harness(Duration::ZERO).await;
        let mut rx = h.events.subscribe();
        let path = h.dir.path().join("cached.mp3");
        std::fs::write(&path, b"cached audio").unwrap();
        let key = ContentKey::compute("cached", None);

        let generation = h
            .scheduler
            .play_cached(&MessageKey::new("m1"), path, h.cache.pin(&key))
            .await;
        wait_for_state(&h.scheduler, PlaybackState::Completed).await;

        assert_eq!(
            drain_states(&mut rx),
            vec![
                (generation, PlaybackState::Loading),
                (generation, PlaybackState::Playing),
                (generation, PlaybackState::Completed),
            ]
        );
        assert_eq!(h.device.played_bytes(), b"cached audio");
    }

    #[tokio::test]
    async fn test_segments_play_in_append_order() {
        let h = harness(Duration::from_millis(10)).await;
        let message_id = MessageKey::new("m1");

        let generation = h.scheduler.open_stream(&message_id).await;
        assert_eq!(h.scheduler.state().await, PlaybackState::Loading);

        for (index, bytes) in [b"aaa".as_slice(), b"bbb", b"ccc"].iter().enumerate() {
            let seg = segment(&h.dir, &message_id, index, bytes);
            assert!(h.scheduler.append_segment(generation, &seg).await);
        }
        assert!(h.scheduler.finish_input(generation).await);

        wait_for_state(&h.scheduler, PlaybackState::Completed).await;
        assert_eq!(h.device.played_bytes(), b"aaabbbccc");
    }

    #[tokio::test]
    async fn test_open_stream_reuses_session_for_same_message() {
        let h = harness(Duration::ZERO).await;
        let message_id = MessageKey::new("m1");
        let first = h.scheduler.open_stream(&message_id).await;
        let second = h.scheduler.open_stream(&message_id).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_new_session_stops_previous_first() {
        let h = harness(Duration::from_secs(30)).await;
        let mut rx = h.events.subscribe();
        let a = MessageKey::new("a");
        let b = MessageKey::new("b");

        let gen_a = h.scheduler.open_stream(&a).await;
        let seg = segment(&h.dir, &a, 0, b"a0");
        assert!(h.scheduler.append_segment(gen_a, &seg).await);
        wait_for_state(&h.scheduler, PlaybackState::Playing).await;

        let gen_b = h.scheduler.open_stream(&b).await;
        assert_ne!(gen_a, gen_b);

        let late = segment(&h.dir, &a, 1, b"a1");
        assert!(!h.scheduler.append_segment(gen_a, &late).await);

        assert_eq!(
            drain_states(&mut rx),
            vec![
                (gen_a, PlaybackState::Loading),
                (gen_a, PlaybackState::Playing),
                (gen_a, PlaybackState::Stopped),
                (gen_b, PlaybackState::Loading),
            ]
        );
        assert_eq!(h.scheduler.active_message().await, Some((b, gen_b)));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let h = harness(Duration::from_secs(30)).await;
        let mut rx = h.events.subscribe();

        h.scheduler.stop().await;
        let generation = h.scheduler.open_stream(&MessageKey::new("m1")).await;
        h.scheduler.stop().await;
        h.scheduler.stop().await;

        assert_eq!(
            drain_states(&mut rx),
            vec![
                (generation, PlaybackState::Loading),
                (generation, PlaybackState::Stopped),
            ]
        );
        assert_eq!(h.scheduler.state().await, PlaybackState::Idle);
    }

    #[tokio::test]
    async fn test_device_failure_stops_and_resets_once() {
        let h = harness(Duration::ZERO).await;
        let mut rx = h.events.subscribe();
        let message_id = MessageKey::new("m1");
        h.device.fail_next();

        let generation = h.scheduler.open_stream(&message_id).await;
        let seg = segment(&h.dir, &message_id, 0, b"boom");
        h.scheduler.append_segment(generation, &seg).await;
        wait_for_state(&h.scheduler, PlaybackState::Stopped).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut failures = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, PlaybackEvent::PlaybackFailed { .. }) {
                failures += 1;
            }
        }
        assert_eq!(failures, 1);
        assert_eq!(h.device.reset_count(), 1);
        assert!(h.device.played().is_empty());
    }

    #[tokio::test]
    async fn test_cached_entry_pinned_while_playing() {
        let h = harness(Duration::from_secs(30)).await;
        let key = ContentKey::compute("pinned", None);
        let source = h.dir.path().join("src.mp3");
        std::fs::write(&source, b"pinned audio").unwrap();
        h.cache.store(&key, &source).await.unwrap();

        let (path, pin) = h.cache.lookup_pinned(&key).await.unwrap();
        h.scheduler
            .play_cached(&MessageKey::new("m1"), path, pin)
            .await;
        wait_for_state(&h.scheduler, PlaybackState::Playing).await;

        let policy = EvictionPolicy {
            max_entries: Some(0),
            ..Default::default()
        };
        let report = h.cache.evict(&policy).await.unwrap();
        assert_eq!(report.skipped_pinned, 1);

        h.scheduler.stop().await;
        let report = h.cache.evict(&policy).await.unwrap();
        assert_eq!(report.removed_entries, 1);
    }

    #[tokio::test]
    async fn test_eviction_between_lookup_and_play_skips_hit() {
        let h = harness(Duration::ZERO).await;
        let mut rx = h.events.subscribe();
        let key = ContentKey::compute("racing eviction", None);
        let source = h.dir.path().join("src.mp3");
        std::fs::write(&source, b"still here").unwrap();
        h.cache.store(&key, &source).await.unwrap();

        let (path, pin) = h.cache.lookup_pinned(&key).await.unwrap();
        let policy = EvictionPolicy {
            max_entries: Some(0),
            ..Default::default()
        };
        let report = h.cache.evict(&policy).await.unwrap();
        assert_eq!(report.skipped_pinned, 1);
        assert_eq!(report.removed_entries, 0);
        assert!(path.exists());

        h.scheduler
            .play_cached(&MessageKey::new("m1"), path, pin)
            .await;
        wait_for_state(&h.scheduler, PlaybackState::Completed).await;
        assert_eq!(h.device.played_bytes(), b"still here");

        let failures = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|event| matches!(event, PlaybackEvent::PlaybackFailed { .. }))
            .count();
        assert_eq!(failures, 0);

        let report = h.cache.evict(&policy).await.unwrap();
        assert_eq!(report.removed_entries, 1);
    }

    #[tokio::test]
    async fn test_fail_pending_leaves_session_with_audio() {
        let h = harness(Duration::from_secs(30)).await;
        let mut rx = h.events.subscribe();
        let message_id = MessageKey::new("m1");

        let generation = h.scheduler.open_stream(&message_id).await;
        let seg = segment(&h.dir, &message_id, 0, b"live");
        assert!(h.scheduler.append_segment(generation, &seg).await);
        wait_for_state(&h.scheduler, PlaybackState::Playing).await;

        h.scheduler.fail_pending(&message_id, "duplicate end").await;

        assert_eq!(h.scheduler.state().await, PlaybackState::Playing);
        let failures = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|event| matches!(event, PlaybackEvent::PlaybackFailed { .. }))
            .count();
        assert_eq!(failures, 0);
    }

    #[tokio::test]
    async fn test_fail_pending_fails_empty_loading_session() {
        let h = harness(Duration::ZERO).await;
        let mut rx = h.events.subscribe();
        let message_id = MessageKey::new("m1");

        let generation = h.scheduler.open_stream(&message_id).await;
        h.scheduler.fail_pending(&message_id, "no audio").await;

        assert_eq!(h.scheduler.state().await, PlaybackState::Idle);
        let failed: Vec<PlaybackEvent> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|event| matches!(event, PlaybackEvent::PlaybackFailed { .. }))
            .collect();
        assert_eq!(
            failed,
            vec![PlaybackEvent::PlaybackFailed {
                generation,
                message_id,
                reason: "no audio".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_fail_publishes_single_failure() {
        let h = harness(Duration::ZERO).await;
        let mut rx = h.events.subscribe();
        let message_id = MessageKey::new("m1");

        let generation = h.scheduler.open_stream(&message_id).await;
        assert!(h.scheduler.fail(generation, "no audio").await);
        assert!(!h.scheduler.fail(generation, "no audio").await);

        let events: Vec<PlaybackEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(
            events.last(),
            Some(&PlaybackEvent::PlaybackFailed {
                generation,
                message_id,
                reason: "no audio".to_string(),
            })
        );
    }
}
