use std::fs::{File, Metadata};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Incremental reader over an append-only log.
///
/// The offset starts at the file size seen on attach, so history written
/// before the tailer existed is never replayed. A shrinking file or a
/// replaced file (different device/inode) restarts from byte 0.
#[derive(Debug)]
pub struct LogTailer {
    path: PathBuf,
    offset: u64,
    identity: Option<FileIdentity>,
    pending: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    dev: u64,
    ino: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TailChunk {
    pub text: String,
    /// The file was truncated or replaced since the previous read.
    pub reset: bool,
}

impl LogTailer {
    pub fn attach(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (offset, identity) = match std::fs::metadata(&path) {
            Ok(meta) => (meta.len(), file_identity(&meta)),
            Err(_) => (0, None),
        };
        Self {
            path,
            offset,
            identity,
            pending: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Forgets everything delivered so far; the next read starts at byte 0.
    pub fn reset(&mut self) {
        self.offset = 0;
        self.identity = None;
        self.pending.clear();
    }

    pub fn read_new_bytes(&mut self) -> io::Result<Vec<u8>> {
        self.read_delta().map(|(bytes, _)| bytes)
    }

    /// Like [`read_new_bytes`](Self::read_new_bytes) but decoded as UTF-8.
    /// An incomplete multi-byte sequence at the end is held back until the
    /// rest of it arrives.
    pub fn read_new_text(&mut self) -> io::Result<TailChunk> {
        let (bytes, reset) = self.read_delta()?;
        self.pending.extend_from_slice(&bytes);
        let complete = complete_prefix_len(&self.pending);
        let held = self.pending.split_off(complete);
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending = held;
        Ok(TailChunk { text, reset })
    }

    fn read_delta(&mut self) -> io::Result<(Vec<u8>, bool)> {
        let meta = match std::fs::metadata(&self.path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), false)),
            Err(err) => return Err(err),
        };
        let size = meta.len();
        let current = file_identity(&meta);

        let replaced = matches!((self.identity, current), (Some(prev), Some(now)) if prev != now);
        let reset = replaced || size < self.offset;
        if reset {
            self.offset = 0;
            self.pending.clear();
        }
        self.identity = current;

        if size <= self.offset {
            return Ok((Vec::new(), reset));
        }

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.offset))?;
        let want = size - self.offset;
        let mut buf = Vec::with_capacity(want as usize);
        file.take(want).read_to_end(&mut buf)?;
        self.offset += buf.len() as u64;
        Ok((buf, reset))
    }
}

#[cfg(unix)]
fn file_identity(meta: &Metadata) -> Option<FileIdentity> {
    use std::os::unix::fs::MetadataExt;
    Some(FileIdentity {
        dev: meta.dev(),
        ino: meta.ino(),
    })
}

#[cfg(not(unix))]
fn file_identity(_meta: &Metadata) -> Option<FileIdentity> {
    None
}

fn complete_prefix_len(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for back in 1..=len.min(3) {
        let byte = bytes[len - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let needed = match byte {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        return if needed > back { len - back } else { len };
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write;

    fn append(path: &Path, data: &[u8]) {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .expect("open log");
        file.write_all(data).expect("append");
    }

    #[test]
    fn attach_skips_existing_history() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ralph-runner.log");
        append(&path, b"old line\n");

        let mut tailer = LogTailer::attach(&path);
        assert_eq!(tailer.offset(), 9);
        assert!(tailer.read_new_bytes().expect("read").is_empty());

        append(&path, b"new line\n");
        assert_eq!(tailer.read_new_bytes().expect("read"), b"new line\n");
    }

    #[test]
    fn chunks_are_contiguous_and_ordered() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ralph-runner.log");
        let mut tailer = LogTailer::attach(&path);

        let writes: [&[u8]; 4] = [b"alpha ", b"", b"beta\n", b"gamma"];
        let mut collected = Vec::new();
        let mut written = Vec::new();
        for data in writes {
            append(&path, data);
            written.extend_from_slice(data);
            let chunk = tailer.read_new_bytes().expect("read");
            assert_eq!(chunk, data);
            collected.extend_from_slice(&chunk);
            assert_eq!(tailer.offset(), written.len() as u64);
        }
        append(&path, b" one");
        append(&path, b" two");
        collected.extend_from_slice(&tailer.read_new_bytes().expect("read"));
        written.extend_from_slice(b" one two");
        assert_eq!(collected, written);
    }

    #[test]
    fn missing_file_reads_empty_then_streams_from_start() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("later.log");
        let mut tailer = LogTailer::attach(&path);
        assert!(tailer.read_new_bytes().expect("read").is_empty());
        assert_eq!(tailer.offset(), 0);

        append(&path, b"first");
        assert_eq!(tailer.read_new_bytes().expect("read"), b"first");
    }

    #[test]
    fn truncation_restarts_from_zero() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ralph-runner.log");
        let mut tailer = LogTailer::attach(&path);
        append(&path, b"0123456789");
        assert_eq!(tailer.read_new_bytes().expect("read").len(), 10);

        std::fs::write(&path, b"abc").expect("truncate");
        let chunk = tailer.read_new_text().expect("read");
        assert!(chunk.reset);
        assert_eq!(chunk.text, "abc");
        assert_eq!(tailer.offset(), 3);
    }

    #[test]
    fn replaced_file_restarts_even_when_larger() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ralph-runner.log");
        let mut tailer = LogTailer::attach(&path);
        append(&path, b"short");
        assert_eq!(tailer.read_new_bytes().expect("read"), b"short");

        let replacement = dir.path().join("rotated.log");
        std::fs::write(&replacement, b"a much longer replacement").expect("write");
        std::fs::rename(&replacement, &path).expect("rename");

        let chunk = tailer.read_new_text().expect("read");
        if cfg!(unix) {
            assert!(chunk.reset);
            assert_eq!(chunk.text, "a much longer replacement");
        }
    }

    #[test]
    fn explicit_reset_rereads_everything() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ralph-runner.log");
        append(&path, b"kept");
        let mut tailer = LogTailer::attach(&path);
        tailer.reset();
        assert_eq!(tailer.read_new_bytes().expect("read"), b"kept");
    }

    #[test]
    fn split_multibyte_characters_are_held_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ralph-runner.log");
        let mut tailer = LogTailer::attach(&path);
        let rocket = "🚀".as_bytes();

        append(&path, b"go ");
        append(&path, &rocket[..2]);
        let first = tailer.read_new_text().expect("read");
        assert_eq!(first.text, "go ");

        append(&path, &rocket[2..]);
        append(&path, b"!");
        let second = tailer.read_new_text().expect("read");
        assert_eq!(second.text, "🚀!");
        assert!(!second.reset);
    }

    #[test]
    fn prefix_len_handles_sequences() {
        assert_eq!(complete_prefix_len(b""), 0);
        assert_eq!(complete_prefix_len("é".as_bytes()), 2);
        assert_eq!(complete_prefix_len(&"é".as_bytes()[..1]), 0);
        assert_eq!(complete_prefix_len(&"a€".as_bytes()[..3]), 1);
        assert_eq!(complete_prefix_len("a€".as_bytes()), 4);
    }
}
