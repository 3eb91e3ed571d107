//! Playback over a recorded analysis.
//!
//! Autoplay stops on the last frame: `playing` drops to false and the cursor
//! stays put. `play()` from the last frame starts over at frame 0. Manual
//! stepping wraps in both directions whether or not autoplay is running.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::error::PlaybackError;
use crate::model::{DetectionResult, ResultSequence};
use crate::sink::{PlaybackProgress, RenderedFrame, ResultSink};

pub struct SequencePlayer {
    frames: Vec<Arc<DetectionResult>>,
    total_source_frame_count: u64,
    processed_frame_count: usize,
    cursor: usize,
    playing: bool,
    sink: ResultSink,
}

impl SequencePlayer {
    /// Create a paused player showing the first frame.
    pub fn new(sequence: ResultSequence, sink: ResultSink) -> Self {
        let player = Self {
            frames: sequence.frames().iter().cloned().map(Arc::new).collect(),
            total_source_frame_count: sequence.total_source_frame_count(),
            processed_frame_count: sequence.processed_frame_count(),
            cursor: 0,
            playing: false,
            sink,
        };
        player.publish();
        player
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Always false: sequences are never empty
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn current(&self) -> &DetectionResult {
        &self.frames[self.cursor]
    }

    pub fn progress(&self) -> PlaybackProgress {
        PlaybackProgress {
            total_source_frame_count: self.total_source_frame_count,
            processed_frame_count: self.processed_frame_count,
            current_frame_number: self.cursor + 1,
        }
    }

    pub fn step_forward(&mut self) -> usize {
        self.move_to((self.cursor + 1) % self.len())
    }

    pub fn step_backward(&mut self) -> usize {
        let len = self.len();
        self.move_to((self.cursor + len - 1) % len)
    }

    pub fn seek(&mut self, index: usize) -> Result<(), PlaybackError> {
        if index >= self.len() {
            return Err(PlaybackError::OutOfRange {
                index,
                len: self.len(),
            });
        }
        self.move_to(index);
        Ok(())
    }

    /// Start autoplay. From the last frame this rewinds to frame 0 first;
    /// a single-frame sequence has nothing to play.
    pub fn play(&mut self) {
        if self.at_end() {
            self.move_to(0);
        }
        self.playing = !self.at_end();
        log::debug!("[Player] play from frame {}", self.cursor + 1);
    }

    pub fn pause(&mut self) {
        self.playing = false;
    }

    /// Flip between playing and paused. Returns the new `playing` value.
    pub fn toggle(&mut self) -> bool {
        if self.playing {
            self.pause();
        } else {
            self.play();
        }
        self.playing
    }

    /// One autoplay step. Returns whether playback continues.
    pub fn tick(&mut self) -> bool {
        if !self.playing {
            return false;
        }
        if !self.at_end() {
            self.move_to(self.cursor + 1);
        }
        if self.at_end() {
            log::debug!("[Player] reached last frame, stopping");
            self.playing = false;
        }
        self.playing
    }

    fn at_end(&self) -> bool {
        self.cursor + 1 >= self.len()
    }

    fn move_to(&mut self, index: usize) -> usize {
        self.cursor = index;
        self.publish();
        index
    }

    fn publish(&self) {
        self.sink.publish(RenderedFrame {
            result: self.frames[self.cursor].clone(),
            progress: Some(self.progress()),
        });
    }
}

// ── Autoplay driver ─────────────────────────────────────────────────

pub type SharedPlayer = Arc<Mutex<SequencePlayer>>;

fn lock(player: &SharedPlayer) -> MutexGuard<'_, SequencePlayer> {
    match player.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Ticks a shared player at a fixed interval while it is playing.
///
/// The task exits once the player stops (end reached or paused). Dropping
/// the handle stops the task too.
pub struct Autoplay {
    handle: JoinHandle<()>,
}

impl Autoplay {
    pub fn spawn(player: SharedPlayer, tick_interval: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; the current frame is already shown.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !lock(&player).tick() {
                    break;
                }
            }
            log::debug!("[Player] autoplay finished");
        });
        Self { handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for autoplay to run out.
    pub async fn finished(mut self) {
        let _ = (&mut self.handle).await;
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for Autoplay {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(label: &str) -> DetectionResult {
        DetectionResult::from_json(&format!(
            r#"{{"detections": [{{"label": "{}", "confidence": 0.5}}], "image": "AQID"}}"#,
            label
        ))
        .unwrap()
    }

    fn player(len: usize) -> (SequencePlayer, ResultSink) {
        let frames = (0..len).map(|i| result(&format!("f{}", i))).collect();
        let sequence = ResultSequence::new(frames, 90).unwrap();
        let sink = ResultSink::new();
        (SequencePlayer::new(sequence, sink.clone()), sink)
    }

    fn shown(sink: &ResultSink) -> (String, usize) {
        let frame = sink.latest().unwrap();
        (
            frame.result.detections[0].label.clone(),
            frame.progress.unwrap().current_frame_number,
        )
    }

    #[test]
    fn new_player_shows_first_frame() {
        let (player, sink) = player(3);
        assert_eq!(player.cursor(), 0);
        assert!(!player.is_playing());
        assert_eq!(shown(&sink), ("f0".to_string(), 1));
        let progress = sink.latest().unwrap().progress.unwrap();
        assert_eq!(progress.total_source_frame_count, 90);
        assert_eq!(progress.processed_frame_count, 3);
    }

    #[test]
    fn steps_wrap_both_ways() {
        let (mut player, sink) = player(3);
        assert_eq!(player.step_backward(), 2);
        assert_eq!(shown(&sink), ("f2".to_string(), 3));
        assert_eq!(player.step_forward(), 0);
        assert_eq!(player.step_forward(), 1);
        assert_eq!(player.current().detections[0].label, "f1");
    }

    #[test]
    fn tick_stops_on_last_frame() {
        let (mut player, _sink) = player(3);
        player.play();
        assert!(player.tick());
        assert!(!player.tick());
        assert_eq!(player.cursor(), 2);
        assert!(!player.is_playing());
        assert!(!player.tick());
        assert_eq!(player.cursor(), 2);
    }

    #[test]
    fn play_from_end_restarts() {
        let (mut player, sink) = player(3);
        player.seek(2).unwrap();
        player.play();
        assert!(player.is_playing());
        assert_eq!(player.cursor(), 0);
        assert_eq!(shown(&sink).1, 1);
    }

    #[test]
    fn single_frame_never_plays() {
        let (mut player, _sink) = player(1);
        player.play();
        assert!(!player.is_playing());
        assert_eq!(player.step_forward(), 0);
        assert_eq!(player.step_backward(), 0);
    }

    #[test]
    fn toggle_and_seek() {
        let (mut player, _sink) = player(4);
        assert!(player.toggle());
        assert!(!player.toggle());
        assert!(matches!(
            player.seek(4),
            Err(PlaybackError::OutOfRange { index: 4, len: 4 })
        ));
        player.seek(3).unwrap();
        assert_eq!(player.progress().current_frame_number, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn autoplay_runs_to_the_end() {
        let (player, sink) = player(5);
        let player = Arc::new(Mutex::new(player));
        lock(&player).play();

        let autoplay = Autoplay::spawn(player.clone(), Duration::from_millis(100));
        autoplay.finished().await;

        let guard = lock(&player);
        assert_eq!(guard.cursor(), 4);
        assert!(!guard.is_playing());
        assert_eq!(shown(&sink), ("f4".to_string(), 5));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_autoplay_stops_ticking() {
        let (player, _sink) = player(50);
        let player = Arc::new(Mutex::new(player));
        lock(&player).play();

        let autoplay = Autoplay::spawn(player.clone(), Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(350)).await;
        drop(autoplay);
        let cursor = lock(&player).cursor();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(lock(&player).cursor(), cursor);
        assert!(cursor > 0);
    }
}
