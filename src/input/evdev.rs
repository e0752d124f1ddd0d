//! evdev input adapter
//!
//! Reads `struct input_event` records from Linux event devices opened in
//! non-blocking mode and turns them into [`InputEvent`]s. Relative motion is
//! accumulated until `SYN_REPORT` and applied to a pointer clamped to the
//! display geometry.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use windowserver_ipc::{InputEvent, Modifiers};

use super::adapter::InputAdapter;
use crate::shared::window_state::Rect;

const EV_SYN: u16 = 0x00;
const EV_KEY: u16 = 0x01;
const EV_REL: u16 = 0x02;

const SYN_REPORT: u16 = 0;

const REL_X: u16 = 0x00;
const REL_Y: u16 = 0x01;
const REL_HWHEEL: u16 = 0x06;
const REL_WHEEL: u16 = 0x08;

const BTN_LEFT: u16 = 0x110;
const BTN_RIGHT: u16 = 0x111;
const BTN_MIDDLE: u16 = 0x112;
const BTN_TASK: u16 = 0x117;

const KEY_LEFTCTRL: u16 = 29;
const KEY_LEFTSHIFT: u16 = 42;
const KEY_RIGHTSHIFT: u16 = 54;
const KEY_LEFTALT: u16 = 56;
const KEY_RIGHTCTRL: u16 = 97;
const KEY_RIGHTALT: u16 = 100;
const KEY_LEFTMETA: u16 = 125;
const KEY_RIGHTMETA: u16 = 126;

/// Size of one kernel `input_event` record
const RECORD_SIZE: usize = std::mem::size_of::<libc::input_event>();

/// Split a raw record into (type, code, value). The timestamp is ignored.
fn parse_record(record: &[u8]) -> Option<(u16, u16, i32)> {
    if record.len() != RECORD_SIZE {
        return None;
    }
    let tail = &record[RECORD_SIZE - 8..];
    let kind = u16::from_ne_bytes([tail[0], tail[1]]);
    let code = u16::from_ne_bytes([tail[2], tail[3]]);
    let value = i32::from_ne_bytes([tail[4], tail[5], tail[6], tail[7]]);
    Some((kind, code, value))
}

fn modifier_for(code: u16) -> Option<Modifiers> {
    match code {
        KEY_LEFTSHIFT | KEY_RIGHTSHIFT => Some(Modifiers::SHIFT),
        KEY_LEFTCTRL | KEY_RIGHTCTRL => Some(Modifiers::CTRL),
        KEY_LEFTALT | KEY_RIGHTALT => Some(Modifiers::ALT),
        KEY_LEFTMETA | KEY_RIGHTMETA => Some(Modifiers::SUPER),
        _ => None,
    }
}

/// Button numbers follow the X convention: 1 left, 2 middle, 3 right
fn button_number(code: u16) -> u32 {
    match code {
        BTN_LEFT => 1,
        BTN_MIDDLE => 2,
        BTN_RIGHT => 3,
        other => u32::from(other - BTN_LEFT) + 1,
    }
}

/// Stateful translation of evdev records shared by all devices
#[derive(Debug)]
pub struct EvdevDecoder {
    bounds: Rect,
    pointer: (i32, i32),
    motion: (i32, i32),
    wheel: (f64, f64),
    modifiers: Modifiers,
}

impl EvdevDecoder {
    /// Start with the pointer in the middle of `bounds`
    pub fn new(bounds: Rect) -> Self {
        let half = |n: u32| i32::try_from(n / 2).unwrap_or(i32::MAX);
        Self {
            bounds,
            pointer: (bounds.x + half(bounds.width), bounds.y + half(bounds.height)),
            motion: (0, 0),
            wheel: (0.0, 0.0),
            modifiers: Modifiers::empty(),
        }
    }

    pub fn pointer(&self) -> (i32, i32) {
        self.pointer
    }

    /// Feed one record, appending any completed events to `out`
    pub fn decode(&mut self, kind: u16, code: u16, value: i32, out: &mut VecDeque<InputEvent>) {
        match kind {
            EV_KEY if (BTN_LEFT..=BTN_TASK).contains(&code) => {
                let (x, y) = self.pointer;
                out.push_back(InputEvent::PointerButton {
                    x,
                    y,
                    button: button_number(code),
                    pressed: value != 0,
                });
            }
            EV_KEY => {
                if let Some(modifier) = modifier_for(code) {
                    self.modifiers.set(modifier, value != 0);
                }
                out.push_back(InputEvent::Key {
                    keycode: u32::from(code),
                    pressed: value != 0,
                    modifiers: self.modifiers,
                });
            }
            EV_REL => match code {
                REL_X => self.motion.0 += value,
                REL_Y => self.motion.1 += value,
                REL_WHEEL => self.wheel.1 += f64::from(value),
                REL_HWHEEL => self.wheel.0 += f64::from(value),
                _ => {}
            },
            EV_SYN if code == SYN_REPORT => self.flush(out),
            _ => {}
        }
    }

    fn flush(&mut self, out: &mut VecDeque<InputEvent>) {
        if self.motion != (0, 0) {
            let (dx, dy) = std::mem::take(&mut self.motion);
            self.pointer = self.clamp(self.pointer.0.saturating_add(dx), self.pointer.1.saturating_add(dy));
            let (x, y) = self.pointer;
            out.push_back(InputEvent::PointerMotion { x, y });
        }
        if self.wheel != (0.0, 0.0) {
            let (delta_x, delta_y) = std::mem::take(&mut self.wheel);
            let (x, y) = self.pointer;
            out.push_back(InputEvent::Scroll { x, y, delta_x, delta_y });
        }
    }

    fn clamp(&self, x: i32, y: i32) -> (i32, i32) {
        let right = self.bounds.x.saturating_add(i32::try_from(self.bounds.width).unwrap_or(i32::MAX));
        let bottom = self.bounds.y.saturating_add(i32::try_from(self.bounds.height).unwrap_or(i32::MAX));
        (
            x.clamp(self.bounds.x, (right - 1).max(self.bounds.x)),
            y.clamp(self.bounds.y, (bottom - 1).max(self.bounds.y)),
        )
    }
}

struct EvdevDevice {
    path: PathBuf,
    file: File,
}

/// Input adapter over one or more evdev device nodes
pub struct EvdevInput {
    devices: Vec<EvdevDevice>,
    decoder: EvdevDecoder,
    pending: VecDeque<InputEvent>,
    closed: Vec<RawFd>,
}

impl EvdevInput {
    pub fn open(paths: &[PathBuf], bounds: Rect) -> Result<Self> {
        let devices = paths
            .iter()
            .map(|path| Self::open_device(path))
            .collect::<Result<Vec<_>>>()?;
        info!("Opened {} input device(s)", devices.len());

        Ok(Self {
            devices,
            decoder: EvdevDecoder::new(bounds),
            pending: VecDeque::new(),
            closed: Vec::new(),
        })
    }

    fn open_device(path: &Path) -> Result<EvdevDevice> {
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK | libc::O_CLOEXEC)
            .open(path)
            .with_context(|| format!("Failed to open input device {:?}", path))?;
        debug!("Opened input device {:?}", path);
        Ok(EvdevDevice {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Descriptors to watch for readability
    pub fn fds(&self) -> Vec<RawFd> {
        self.devices.iter().map(|d| d.file.as_raw_fd()).collect()
    }

    /// Read whatever every device has buffered right now
    fn fill(&mut self) {
        let mut buf = [0u8; RECORD_SIZE * 64];
        let mut failed = Vec::new();

        for (index, device) in self.devices.iter_mut().enumerate() {
            loop {
                match device.file.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        for record in buf[..n].chunks_exact(RECORD_SIZE) {
                            if let Some((kind, code, value)) = parse_record(record) {
                                self.decoder.decode(kind, code, value, &mut self.pending);
                            }
                        }
                    }
                    Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        warn!("Input device {:?} failed: {}", device.path, e);
                        failed.push(index);
                        break;
                    }
                }
            }
        }

        for index in failed.into_iter().rev() {
            let device = self.devices.remove(index);
            warn!("Dropped input device {:?}", device.path);
            self.closed.push(device.file.as_raw_fd());
        }
    }
}

impl InputAdapter for EvdevInput {
    fn next_event(&mut self) -> Option<InputEvent> {
        if self.pending.is_empty() {
            self.fill();
        }
        self.pending.pop_front()
    }

    fn take_closed_fds(&mut self) -> Vec<RawFd> {
        std::mem::take(&mut self.closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(decoder: &mut EvdevDecoder, records: &[(u16, u16, i32)]) -> Vec<InputEvent> {
        let mut out = VecDeque::new();
        for &(kind, code, value) in records {
            decoder.decode(kind, code, value, &mut out);
        }
        out.into_iter().collect()
    }

    #[test]
    fn test_parse_record_layout() {
        let mut record = vec![0u8; RECORD_SIZE];
        record[RECORD_SIZE - 8..RECORD_SIZE - 6].copy_from_slice(&EV_KEY.to_ne_bytes());
        record[RECORD_SIZE - 6..RECORD_SIZE - 4].copy_from_slice(&30u16.to_ne_bytes());
        record[RECORD_SIZE - 4..].copy_from_slice(&1i32.to_ne_bytes());

        assert_eq!(parse_record(&record), Some((EV_KEY, 30, 1)));
        assert_eq!(parse_record(&record[1..]), None);
    }

    #[test]
    fn test_motion_accumulates_until_report() {
        let mut decoder = EvdevDecoder::new(Rect::new(0, 0, 800, 600));
        let events = decode_all(
            &mut decoder,
            &[(EV_REL, REL_X, 10), (EV_REL, REL_Y, -5), (EV_REL, REL_X, 2)],
        );
        assert!(events.is_empty());

        let events = decode_all(&mut decoder, &[(EV_SYN, SYN_REPORT, 0)]);
        assert_eq!(events, vec![InputEvent::PointerMotion { x: 412, y: 295 }]);
    }

    #[test]
    fn test_pointer_clamped_to_bounds() {
        let mut decoder = EvdevDecoder::new(Rect::new(0, 0, 800, 600));
        decode_all(&mut decoder, &[(EV_REL, REL_X, -5000), (EV_REL, REL_Y, 5000), (EV_SYN, SYN_REPORT, 0)]);
        assert_eq!(decoder.pointer(), (0, 599));
    }

    #[test]
    fn test_buttons_use_pointer_position() {
        let mut decoder = EvdevDecoder::new(Rect::new(0, 0, 100, 100));
        let events = decode_all(&mut decoder, &[(EV_KEY, BTN_RIGHT, 1), (EV_KEY, BTN_LEFT, 0)]);
        assert_eq!(
            events,
            vec![
                InputEvent::PointerButton { x: 50, y: 50, button: 3, pressed: true },
                InputEvent::PointerButton { x: 50, y: 50, button: 1, pressed: false },
            ]
        );
    }

    #[test]
    fn test_modifiers_tracked_across_keys() {
        let mut decoder = EvdevDecoder::new(Rect::new(0, 0, 100, 100));
        let events = decode_all(
            &mut decoder,
            &[(EV_KEY, KEY_LEFTALT, 1), (EV_KEY, 15, 1), (EV_KEY, KEY_LEFTALT, 0), (EV_KEY, 15, 0)],
        );

        assert_eq!(
            events[1],
            InputEvent::Key { keycode: 15, pressed: true, modifiers: Modifiers::ALT }
        );
        assert_eq!(
            events[3],
            InputEvent::Key { keycode: 15, pressed: false, modifiers: Modifiers::empty() }
        );
    }

    #[test]
    fn test_failed_device_reports_closed_fd() {
        let dir = tempfile::tempdir().unwrap();
        let mut input = EvdevInput::open(&[dir.path().to_path_buf()], Rect::new(0, 0, 100, 100)).unwrap();
        let fds = input.fds();
        assert_eq!(fds.len(), 1);

        assert_eq!(input.next_event(), None);
        assert!(input.fds().is_empty());
        assert_eq!(input.take_closed_fds(), fds);
        assert!(input.take_closed_fds().is_empty());
    }

    #[test]
    fn test_wheel_reported_as_scroll() {
        let mut decoder = EvdevDecoder::new(Rect::new(0, 0, 100, 100));
        let events = decode_all(&mut decoder, &[(EV_REL, REL_WHEEL, -1), (EV_SYN, SYN_REPORT, 0)]);
        assert_eq!(
            events,
            vec![InputEvent::Scroll { x: 50, y: 50, delta_x: 0.0, delta_y: -1.0 }]
        );
    }
}
