use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tokio::sync::{mpsc, oneshot};

use crate::model::Event;

/// Encode a single event to `[len][bincode][crc32]`.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "event too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Read one `[u32]` field. `Ok(None)` means the file ended mid-entry.
fn read_u32(reader: &mut impl Read) -> io::Result<Option<u32>> {
    let mut buf = [0u8; 4];
    match reader.read_exact(&mut buf) {
        Ok(()) => Ok(Some(u32::from_le_bytes(buf))),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

/// Append-only write-ahead log of booking events.
///
/// Entry format: `[u32: len][bincode: Event][u32: crc32]`, little endian.
/// `len` counts the payload only. A torn or corrupt tail (crash mid-write) is
/// dropped on replay.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Append and fsync one event. Tests only; the writer task batches.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer an event without syncing. Durable only after `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_event(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    fn tmp_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Replace the log with `events`: write a temp file, fsync, rename over.
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        let tmp_path = Self::tmp_path(&self.path);
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            for event in events {
                encode_event(&mut writer, event)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Read back every intact event. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();

        while let Some(len) = read_u32(&mut reader)? {
            let mut payload = vec![0u8; len as usize];
            match reader.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            let Some(stored_crc) = read_u32(&mut reader)? else {
                break;
            };
            if stored_crc != crc32fast::hash(&payload) {
                break;
            }
            match bincode::deserialize::<Event>(&payload) {
                Ok(event) => events.push(event),
                Err(_) => break,
            }
        }

        Ok(events)
    }
}

// ── Group-commit writer ──────────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Cloneable handle to the task that owns the [`Wal`].
///
/// Appends queued while a sync is in flight are written together and share
/// the next fsync.
#[derive(Clone)]
pub struct WalHandle {
    tx: mpsc::Sender<WalCommand>,
}

type Pending = Vec<(Event, oneshot::Sender<io::Result<()>>)>;

const CHANNEL_CAPACITY: usize = 4096;

impl WalHandle {
    /// Move `wal` onto a background task. Must be called inside a tokio runtime.
    pub fn spawn(wal: Wal) -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(writer_loop(wal, rx));
        Self { tx }
    }

    /// Durably append one event. Returns once it has been fsynced.
    pub async fn append(&self, event: Event) -> io::Result<()> {
        let (response, rx) = oneshot::channel();
        self.send(WalCommand::Append { event, response }).await?;
        rx.await.map_err(|_| writer_gone())?
    }

    pub async fn compact(&self, events: Vec<Event>) -> io::Result<()> {
        let (response, rx) = oneshot::channel();
        self.send(WalCommand::Compact { events, response }).await?;
        rx.await.map_err(|_| writer_gone())?
    }

    pub async fn appends_since_compact(&self) -> io::Result<u64> {
        let (response, rx) = oneshot::channel();
        self.send(WalCommand::AppendsSinceCompact { response })
            .await?;
        rx.await.map_err(|_| writer_gone())
    }

    async fn send(&self, cmd: WalCommand) -> io::Result<()> {
        self.tx.send(cmd).await.map_err(|_| writer_gone())
    }
}

fn writer_gone() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "WAL writer shut down")
}

/// 1. Wait for a command.
/// 2. For an append, drain every append already queued into one batch.
/// 3. Write the batch, fsync once, answer every sender.
/// 4. A non-append command met while draining runs after the batch.
async fn writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let mut batch: Pending = Vec::new();
        let mut next = Some(cmd);
        while let Some(cmd) = next.take() {
            match cmd {
                WalCommand::Append { event, response } => {
                    batch.push((event, response));
                    next = rx.try_recv().ok();
                }
                other => {
                    flush_batch(&mut wal, &mut batch);
                    handle_control(&mut wal, other);
                }
            }
        }
        flush_batch(&mut wal, &mut batch);
    }
}

fn flush_batch(wal: &mut Wal, batch: &mut Pending) {
    if batch.is_empty() {
        return;
    }
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let append_result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes don't leak into
    // the next batch; every caller in this batch is told it failed.
    let flush_result = wal.flush_sync();
    let result = append_result.and(flush_result);

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, response) in batch.drain(..) {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = response.send(reply);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.compact(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by writer_loop"),
    }
}
