use std::collections::BTreeMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use log::error;

use crate::metadata::{
    MetadataError, Package, XML_NS_COMMON, XML_NS_FILELISTS, XML_NS_OTHER, XML_NS_RPM,
};
use crate::{filelist, other, primary};

// Once this many tasks are queued ahead of the serializer, workers block on
// their emit turn instead of buffering more results in memory.
const MAX_TASK_BUFFER_LEN: usize = 20;

/// The three XML fragments generated from one package.
#[derive(Debug, Clone)]
pub(crate) struct XmlChunks {
    pub primary: String,
    pub filelists: String,
    pub other: String,
}

impl XmlChunks {
    pub(crate) fn dump(package: &Package) -> Result<Self, MetadataError> {
        Ok(XmlChunks {
            primary: primary::dump_package_fragment(package)?,
            filelists: filelist::dump_package_fragment(package)?,
            other: other::dump_package_fragment(package)?,
        })
    }
}

struct GateState {
    writer: Option<Box<dyn Write + Send>>,
    next_id: u64,
}

/// One output stream: a compressed writer guarded by a mutex, plus the id of
/// the task whose fragment may be appended next. Writers block on the condvar
/// until their task's turn comes up.
struct StreamGate {
    name: &'static str,
    state: Mutex<GateState>,
    ready: Condvar,
}

impl StreamGate {
    fn new(name: &'static str, writer: Box<dyn Write + Send>) -> Self {
        Self {
            name,
            state: Mutex::new(GateState {
                writer: Some(writer),
                next_id: 0,
            }),
            ready: Condvar::new(),
        }
    }

    /// Append `bytes` as the fragment of task `id`, in id order. The counter
    /// is advanced even if the write fails, so later tasks never deadlock.
    fn write_chunk(&self, id: u64, bytes: &[u8], had_errors: &AtomicBool) {
        let mut state = self.state.lock().unwrap();
        while state.next_id != id {
            state = self.ready.wait(state).unwrap();
        }
        state.next_id += 1;

        if let Some(writer) = state.writer.as_mut() {
            if let Err(e) = writer.write_all(bytes) {
                error!("Cannot add {} chunk: {}", self.name, e);
                had_errors.store(true, Ordering::Relaxed);
            }
        }

        self.ready.notify_all();
    }

    /// Advance the counter for a task that produced no output.
    fn skip(&self, id: u64) {
        let mut state = self.state.lock().unwrap();
        while state.next_id != id {
            state = self.ready.wait(state).unwrap();
        }
        state.next_id += 1;
        self.ready.notify_all();
    }

    fn write_raw(&self, bytes: &[u8]) -> Result<(), MetadataError> {
        let mut state = self.state.lock().unwrap();
        if let Some(writer) = state.writer.as_mut() {
            writer.write_all(bytes)?;
        }
        Ok(())
    }

    fn next_id(&self) -> u64 {
        self.state.lock().unwrap().next_id
    }

    // Flush and drop the writer - the compression encoders only finalize
    // their streams on drop.
    fn finish(&self) -> Result<(), MetadataError> {
        let mut state = self.state.lock().unwrap();
        if let Some(mut writer) = state.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

/// Serializes worker results into the three metadata streams in submission
/// order, with bounded out-of-order buffering in between.
pub(crate) struct OrderedEmitter {
    pri: StreamGate,
    fil: StreamGate,
    oth: StreamGate,

    buffer: Mutex<BTreeMap<u64, XmlChunks>>,
    task_count: u64,
    package_count: AtomicU64,
    had_errors: Arc<AtomicBool>,
}

impl OrderedEmitter {
    pub fn new(
        pri_writer: Box<dyn Write + Send>,
        fil_writer: Box<dyn Write + Send>,
        oth_writer: Box<dyn Write + Send>,
        task_count: u64,
        had_errors: Arc<AtomicBool>,
    ) -> Self {
        Self {
            pri: StreamGate::new("primary", pri_writer),
            fil: StreamGate::new("filelists", fil_writer),
            oth: StreamGate::new("other", oth_writer),
            buffer: Mutex::new(BTreeMap::new()),
            task_count,
            package_count: AtomicU64::new(0),
            had_errors,
        }
    }

    /// Write the XML declarations and root open tags, before any package is
    /// emitted.
    pub fn write_headers(&self, num_pkgs: u64) -> Result<(), MetadataError> {
        self.pri.write_raw(
            format!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<metadata xmlns=\"{}\" xmlns:rpm=\"{}\" packages=\"{}\">\n",
                XML_NS_COMMON, XML_NS_RPM, num_pkgs
            )
            .as_bytes(),
        )?;
        self.fil.write_raw(
            format!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<filelists xmlns=\"{}\" packages=\"{}\">\n",
                XML_NS_FILELISTS, num_pkgs
            )
            .as_bytes(),
        )?;
        self.oth.write_raw(
            format!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<otherdata xmlns=\"{}\" packages=\"{}\">\n",
                XML_NS_OTHER, num_pkgs
            )
            .as_bytes(),
        )?;
        Ok(())
    }

    /// Append one task's fragments to all three streams, each in id order.
    /// Waiting happens only on the task's own turn per stream, so adjacent
    /// tasks overlap across streams.
    pub fn write_package(&self, id: u64, chunks: &XmlChunks) {
        self.package_count.fetch_add(1, Ordering::Relaxed);
        self.pri
            .write_chunk(id, chunks.primary.as_bytes(), &self.had_errors);
        self.fil
            .write_chunk(id, chunks.filelists.as_bytes(), &self.had_errors);
        self.oth
            .write_chunk(id, chunks.other.as_bytes(), &self.had_errors);
    }

    /// Advance all three counters past a task that produced no output.
    pub fn skip_package(&self, id: u64) {
        self.pri.skip(id);
        self.fil.skip(id);
        self.oth.skip(id);
    }

    /// Try to park a finished task in the out-of-order buffer. Refused (and
    /// handed back) when the buffer is full, when it is already this task's
    /// turn, or when this is the final task.
    pub fn try_buffer(&self, id: u64, chunks: XmlChunks) -> Option<XmlChunks> {
        let mut buffer = self.buffer.lock().unwrap();
        if buffer.len() < MAX_TASK_BUFFER_LEN
            && self.pri.next_id() != id
            && self.task_count > id + 1
        {
            buffer.insert(id, chunks);
            None
        } else {
            Some(chunks)
        }
    }

    /// Emit any buffered tasks whose turn has come.
    pub fn drain_ready(&self) {
        loop {
            let task = {
                let mut buffer = self.buffer.lock().unwrap();
                match buffer.first_key_value() {
                    Some((&id, _)) if id == self.pri.next_id() => {
                        buffer.remove(&id).map(|chunks| (id, chunks))
                    }
                    _ => None,
                }
            };

            match task {
                Some((id, chunks)) => self.write_package(id, &chunks),
                None => break,
            }
        }
    }

    pub fn pri_next_id(&self) -> u64 {
        self.pri.next_id()
    }

    pub fn package_count(&self) -> u64 {
        self.package_count.load(Ordering::Relaxed)
    }

    /// Write the root close tags and finalize the compressed writers.
    pub fn finish(&self) -> Result<(), MetadataError> {
        self.pri.write_raw(b"</metadata>\n")?;
        self.fil.write_raw(b"</filelists>\n")?;
        self.oth.write_raw(b"</otherdata>\n")?;
        self.pri.finish()?;
        self.fil.finish()?;
        self.oth.finish()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn chunks(id: u64) -> XmlChunks {
        XmlChunks {
            primary: format!("p{};", id),
            filelists: format!("f{};", id),
            other: format!("o{};", id),
        }
    }

    fn emitter(task_count: u64) -> (OrderedEmitter, SharedBuf, SharedBuf, SharedBuf) {
        let (pri, fil, oth) = (SharedBuf::default(), SharedBuf::default(), SharedBuf::default());
        let emitter = OrderedEmitter::new(
            Box::new(pri.clone()),
            Box::new(fil.clone()),
            Box::new(oth.clone()),
            task_count,
            Arc::new(AtomicBool::new(false)),
        );
        (emitter, pri, fil, oth)
    }

    #[test]
    fn test_ordered_emit_across_threads() {
        let task_count = 50u64;
        let (emitter, pri, fil, oth) = emitter(task_count);
        let emitter = Arc::new(emitter);

        // one thread per task, spawned in reverse submission order; the
        // gates must still emit in id order
        std::thread::scope(|s| {
            for id in (0..task_count).rev() {
                let emitter = Arc::clone(&emitter);
                s.spawn(move || emitter.write_package(id, &chunks(id)));
            }
        });

        let expected_pri: String = (0..task_count).map(|i| format!("p{};", i)).collect();
        let expected_fil: String = (0..task_count).map(|i| format!("f{};", i)).collect();
        let expected_oth: String = (0..task_count).map(|i| format!("o{};", i)).collect();
        assert_eq!(pri.contents(), expected_pri);
        assert_eq!(fil.contents(), expected_fil);
        assert_eq!(oth.contents(), expected_oth);
        assert_eq!(emitter.package_count(), task_count);
    }

    #[test]
    fn test_skip_advances_counters() {
        let (emitter, pri, _, _) = emitter(3);
        let emitter = Arc::new(emitter);

        std::thread::scope(|s| {
            let e = Arc::clone(&emitter);
            s.spawn(move || e.write_package(2, &chunks(2)));
            let e = Arc::clone(&emitter);
            s.spawn(move || e.skip_package(1));
            emitter.write_package(0, &chunks(0));
        });

        assert_eq!(pri.contents(), "p0;p2;");
        assert_eq!(emitter.pri_next_id(), 3);
    }

    #[test]
    fn test_buffering_rules() {
        let (emitter, _, _, _) = emitter(30);

        // not our turn, buffer has room -> accepted
        assert!(emitter.try_buffer(5, chunks(5)).is_none());
        // it IS this task's turn -> refused
        assert!(emitter.try_buffer(0, chunks(0)).is_some());
        // final task -> refused
        assert!(emitter.try_buffer(29, chunks(29)).is_some());

        // fill the buffer to its cap
        for id in 6..(6 + MAX_TASK_BUFFER_LEN as u64 - 1) {
            assert!(emitter.try_buffer(id, chunks(id)).is_none());
        }
        assert!(emitter.try_buffer(27, chunks(27)).is_some());
    }

    #[test]
    fn test_drain_emits_ready_tasks_in_order() {
        let (emitter, pri, _, _) = emitter(10);

        for id in [2u64, 1, 3] {
            assert!(emitter.try_buffer(id, chunks(id)).is_none());
        }

        // nothing ready yet - task 0 hasn't been emitted
        emitter.drain_ready();
        assert_eq!(pri.contents(), "");

        emitter.write_package(0, &chunks(0));
        emitter.drain_ready();
        assert_eq!(pri.contents(), "p0;p1;p2;p3;");
    }

    #[test]
    fn test_headers_and_footers() {
        let (emitter, pri, fil, oth) = emitter(0);
        emitter.write_headers(0).unwrap();
        emitter.finish().unwrap();

        assert!(pri.contents().starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<metadata"));
        assert!(pri.contents().contains("packages=\"0\""));
        assert!(pri.contents().ends_with("</metadata>\n"));
        assert!(fil.contents().ends_with("</filelists>\n"));
        assert!(oth.contents().ends_with("</otherdata>\n"));
    }
}
