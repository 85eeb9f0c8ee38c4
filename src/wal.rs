use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Larger length prefixes can only come from a corrupt tail.
const MAX_FRAME_LEN: usize = 1 << 20;

/// Bytes a frame adds around its payload: length prefix and CRC.
const FRAME_OVERHEAD: u64 = 8;

/// Frame one event as `[u32 len][bincode][u32 crc32]`, little-endian.
fn encode_frame(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "WAL frame too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Read one frame and its size on disk. `Ok(None)` means clean EOF or a
/// torn/corrupt tail.
fn decode_frame(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut len_buf = [0u8; 4];
    if !read_or_eof(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Ok(None);
    }

    let mut payload = vec![0u8; len];
    if !read_or_eof(reader, &mut payload)? {
        return Ok(None);
    }
    let mut crc_buf = [0u8; 4];
    if !read_or_eof(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize::<Event>(&payload)
        .ok()
        .map(|event| (event, len as u64 + FRAME_OVERHEAD)))
}

fn read_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Every intact event from the start of `reader`, plus the byte length of
/// that intact prefix.
fn scan(reader: &mut impl Read) -> io::Result<(Vec<Event>, u64)> {
    let mut events = Vec::new();
    let mut valid_len = 0u64;
    while let Some((event, frame_len)) = decode_frame(reader)? {
        events.push(event);
        valid_len += frame_len;
    }
    Ok((events, valid_len))
}

/// The file underneath a [`Wal`].
pub trait LogSink: Write {
    /// Make everything written so far durable.
    fn sync(&mut self) -> io::Result<()>;

    /// Cut the log back to `len` bytes.
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl LogSink for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Append-only write-ahead log of booking events.
///
/// The file only ever holds whole, committed batches. A batch whose write or
/// fsync fails is cut off again before the error is reported, so nothing a
/// caller was told failed can reappear on replay. If the cut itself fails the
/// log is poisoned and refuses further appends until a compaction rewrites it.
pub struct Wal<S: LogSink = File> {
    sink: S,
    path: PathBuf,
    /// Length of the committed prefix of the file.
    committed_len: u64,
    poisoned: bool,
    appends_since_compact: u64,
}

impl Wal<File> {
    /// Open the log at `path`, returning it with every intact event.
    ///
    /// A torn or corrupt tail is truncated away so new frames never land
    /// behind it.
    pub fn open(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let (events, valid_len) = scan(&mut BufReader::new(&file))?;
        let file_len = file.metadata()?.len();
        if file_len > valid_len {
            tracing::warn!(
                "discarding {} trailing bytes of {}",
                file_len - valid_len,
                path.display()
            );
            file.truncate(valid_len)?;
            file.sync()?;
        }
        tracing::debug!("replayed {} WAL events from {}", events.len(), path.display());
        Ok((Self::from_sink(file, path.to_path_buf(), valid_len), events))
    }

    /// Rewrite the log as exactly `events`: temp file, fsync, rename, reopen.
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            for event in events {
                encode_frame(&mut writer, event)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.committed_len = file.metadata()?.len();
        self.sink = file;
        // The rewrite came from memory, so the log agrees with it again.
        self.poisoned = false;
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Replay every intact event. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let (events, _) = scan(&mut BufReader::new(file))?;
        Ok(events)
    }
}

impl<S: LogSink> Wal<S> {
    fn from_sink(sink: S, path: PathBuf, committed_len: u64) -> Self {
        Self {
            sink,
            path,
            committed_len,
            poisoned: false,
            appends_since_compact: 0,
        }
    }

    /// Write and fsync one batch. All of it is committed, or none of it.
    pub fn append_batch<'a>(
        &mut self,
        events: impl IntoIterator<Item = &'a Event>,
    ) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other(
                "WAL is poisoned after a failed rollback; compaction required",
            ));
        }

        let mut buf = Vec::new();
        let mut count = 0u64;
        for event in events {
            encode_frame(&mut buf, event)?;
            count += 1;
        }

        if let Err(e) = self.write_and_sync(&buf) {
            self.rollback();
            return Err(e);
        }
        self.committed_len += buf.len() as u64;
        self.appends_since_compact += count;
        Ok(())
    }

    fn write_and_sync(&mut self, buf: &[u8]) -> io::Result<()> {
        self.sink.write_all(buf)?;
        self.sink.flush()?;
        self.sink.sync()
    }

    fn rollback(&mut self) {
        let len = self.committed_len;
        let result = self.sink.truncate(len).and_then(|()| self.sink.sync());
        if let Err(e) = result {
            tracing::error!(
                "could not roll {} back to {len} bytes, refusing further appends: {e}",
                self.path.display()
            );
            self.poisoned = true;
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }
}
