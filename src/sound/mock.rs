//! Recording backend shared by the unit tests.

use std::sync::{Arc, Mutex};

use super::backend::SoundBackend;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Prepare,
    Play,
    Stop,
    SetLooping(bool),
    SetVolume(f32),
    Release,
}

#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.0.lock().unwrap().iter().filter(|c| *c == call).count()
    }

    fn push(&self, call: Call) {
        self.0.lock().unwrap().push(call);
    }
}

pub struct MockBackend {
    pub log: CallLog,
    pub playing: bool,
    pub play_result: bool,
    pub prepare_result: bool,
}

impl MockBackend {
    pub fn new(log: &CallLog) -> Self {
        Self {
            log: log.clone(),
            playing: false,
            play_result: true,
            prepare_result: true,
        }
    }
}

impl SoundBackend for MockBackend {
    fn prepare(&mut self) -> bool {
        self.log.push(Call::Prepare);
        self.prepare_result
    }

    fn is_playing(&self) -> Option<bool> {
        Some(self.playing)
    }

    fn play(&mut self) -> bool {
        self.log.push(Call::Play);
        self.playing = self.play_result;
        self.play_result
    }

    fn stop(&mut self) {
        self.log.push(Call::Stop);
        self.playing = false;
    }

    fn set_looping(&mut self, looping: bool) {
        self.log.push(Call::SetLooping(looping));
    }

    fn set_volume(&mut self, volume: f32) {
        self.log.push(Call::SetVolume(volume));
    }

    fn release(&mut self) {
        self.log.push(Call::Release);
    }
}
