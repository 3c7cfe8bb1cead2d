use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{error, warn};

use crate::model::Event;

/// Larger length prefixes can only come from a corrupt tail.
const MAX_RECORD_LEN: usize = 1 << 20;

/// Record framing overhead: length prefix plus crc.
const RECORD_OVERHEAD: u64 = 8;

/// Encode one record as `[u32 len][bincode payload][u32 crc32]`, returning
/// the bytes written.
fn encode_record(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_RECORD_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "record too large"));
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(RECORD_OVERHEAD + payload.len() as u64)
}

/// Read one record and its encoded size. `Ok(None)` means clean EOF or an
/// unusable tail.
fn decode_record(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut len_buf = [0u8; 4];
    if !read_or_eof(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_RECORD_LEN {
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
        .map(|event| (event, RECORD_OVERHEAD + len as u64)))
}

fn read_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Intact records from the start of the file and the byte length they cover.
fn scan(path: &Path) -> io::Result<(Vec<Event>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut valid_len = 0;
    while let Some((event, len)) = decode_record(&mut reader)? {
        events.push(event);
        valid_len += len;
    }
    Ok((events, valid_len))
}

/// Append-only reservation log.
///
/// Nothing a later append could land behind is ever left past
/// `durable_len`: a torn tail found at open is cut off, and a batch that
/// fails is cut back out before its error is returned. Replay stops at the
/// first bad record, so stray bytes there would hide every record after
/// them.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    /// Bytes covered by complete, fsynced records.
    durable_len: u64,
    appends_since_compact: u64,
    /// Set when a failed batch could not be cut back out.
    poisoned: bool,
    #[cfg(test)]
    fail_batches: u32,
}

impl Wal {
    /// Open the log at `path` and return its intact records.
    pub fn open(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let (events, durable_len) = scan(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let on_disk = file.metadata()?.len();
        if on_disk > durable_len {
            warn!(
                "dropping {} bytes of unreadable tail from {}",
                on_disk - durable_len,
                path.display()
            );
            file.set_len(durable_len)?;
            file.sync_all()?;
        }
        let wal = Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            durable_len,
            appends_since_compact: 0,
            poisoned: false,
            #[cfg(test)]
            fail_batches: 0,
        };
        Ok((wal, events))
    }

    /// Write and fsync `events` as one unit: on error none of them stay in
    /// the file. If the failed batch cannot be removed, every later append
    /// is refused until the next compaction rewrites the file.
    pub fn append_batch(&mut self, events: &[Event]) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other("log refuses appends after a failed rollback"));
        }
        match self.write_batch(events) {
            Ok(written) => {
                self.durable_len += written;
                self.appends_since_compact += events.len() as u64;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = self.rollback() {
                    error!("could not remove failed batch from {}: {rollback}", self.path.display());
                    self.poisoned = true;
                }
                Err(e)
            }
        }
    }

    fn write_batch(&mut self, events: &[Event]) -> io::Result<u64> {
        let on_disk = self.writer.get_ref().metadata()?.len();
        if on_disk < self.durable_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "log is shorter than its committed records",
            ));
        }
        if on_disk > self.durable_len {
            self.writer.get_ref().set_len(self.durable_len)?;
        }

        let mut written = 0;
        for event in events {
            written += encode_record(&mut self.writer, event)?;
        }
        self.writer.flush()?;
        #[cfg(test)]
        if self.fail_batches > 0 {
            self.fail_batches -= 1;
            return Err(io::Error::other("injected log failure"));
        }
        self.writer.get_ref().sync_all()?;
        Ok(written)
    }

    /// Discard buffered bytes and cut the file back to `durable_len`.
    fn rollback(&mut self) -> io::Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        // Dropping the writer would flush its buffer into the file.
        let _ = stale.into_parts();
        let file = self.writer.get_ref();
        if file.metadata()?.len() > self.durable_len {
            file.set_len(self.durable_len)?;
        }
        file.sync_all()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replace the log with `events`: write a temp file, fsync, rename over.
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        let mut written = 0;
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            for event in events {
                written += encode_record(&mut writer, event)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        let _ = stale.into_parts();
        self.durable_len = written;
        self.appends_since_compact = 0;
        self.poisoned = false;
        Ok(())
    }

    /// All intact records, in append order. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        scan(path).map(|(events, _)| events)
    }

    /// Make the next `batches` appends fail after their bytes reach the
    /// file. Returns how many injected failures were still pending.
    #[cfg(test)]
    pub(crate) fn fail_next_batches(&mut self, batches: u32) -> u32 {
        std::mem::replace(&mut self.fail_batches, batches)
    }
}
