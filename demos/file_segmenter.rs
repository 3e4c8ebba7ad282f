//! File-backed segmenter driving the bridge the way a native engine would
//!
//! Run with: cargo run --example file_segmenter INPUT [OUT_DIR] [SEGMENT_BYTES]
//!
//! Examples:
//!   cargo run --example file_segmenter movie.mp4                 # writes to ./out
//!   cargo run --example file_segmenter movie.mp4 /tmp/seg 2000000
//!
//! The "engine" here does not parse media. It reads the input through the
//! sentinel dispatch functions and splits the bytes round-robin into a
//! video and an audio rendition, cutting a new segment every SEGMENT_BYTES.
//! Each rendition is written by its own thread, so output callbacks for one
//! session arrive concurrently, as they do from a real transcoder.
//!
//! Output layout (per session handle `h`):
//!
//! ```text
//! OUT_DIR/O<h>/dash.mpd
//! OUT_DIR/O<h>/init-stream<stream>.m4s
//! OUT_DIR/O<h>/chunk-stream<stream>-<seg:05>.m4s
//! ```
//!
//! Set RUST_LOG=avio_bridge=debug to watch every open and close.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use avio_bridge::bridge::dispatch;
use avio_bridge::{
    AvType, Bridge, BridgeConfig, EncodingFrameStats, Handle, InputHandler, InputOpener, OpenError,
    OutputHandler, OutputOpener, OutputRequest, StatEvent,
};
use tracing_subscriber::EnvFilter;

/// Opens local files as session inputs
struct FileInputOpener;

impl InputOpener for FileInputOpener {
    fn open(&self, url: &str) -> Result<Box<dyn InputHandler>, OpenError> {
        let file = File::open(url).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => OpenError::NotFound(url.to_string()),
            _ => OpenError::Io(e),
        })?;
        let size = file.metadata().map(|m| m.len() as i64).unwrap_or(-1);

        Ok(Box::new(FileInput {
            url: url.to_string(),
            file,
            size,
        }))
    }
}

struct FileInput {
    url: String,
    file: File,
    size: i64,
}

impl InputHandler for FileInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }

    fn close(&mut self) -> io::Result<()> {
        println!("[{}] input closed", self.url);
        Ok(())
    }

    fn size(&self) -> i64 {
        self.size
    }

    fn stat(&mut self, event: &StatEvent) -> io::Result<()> {
        if let StatEvent::BytesRead(offset) = event {
            println!("[{}] read offset {}", self.url, offset);
        }
        Ok(())
    }
}

/// Writes each output sub-channel to its own file under `dir/O<handle>`
struct FileOutputOpener {
    dir: PathBuf,
}

impl FileOutputOpener {
    fn path_for(&self, request: &OutputRequest) -> PathBuf {
        let dir = self.dir.join(format!("O{}", request.handle));
        let (stream, seg) = (request.stream_index, request.seg_index);

        let name = match request.av_type {
            AvType::Manifest => "dash.mpd".to_string(),
            AvType::VideoInit | AvType::AudioInit => format!("init-stream{}.m4s", stream),
            AvType::VideoSegment | AvType::AudioSegment => {
                format!("chunk-stream{}-{:05}.m4s", stream, seg)
            }
            AvType::MasterPlaylist => "master.m3u8".to_string(),
            AvType::VideoPlaylist | AvType::AudioPlaylist => format!("media_{}.m3u8", stream),
            AvType::KeyMaterial => "key.bin".to_string(),
            AvType::RawContainer => "mp4-stream.mp4".to_string(),
            AvType::FragmentedContainer => "fmp4-stream.mp4".to_string(),
            AvType::Mp4Segment => format!("segment{}-{:05}.mp4", stream, seg),
            AvType::FragmentedVideoSegment => format!("fmp4-vsegment{}-{:05}.mp4", stream, seg),
            AvType::FragmentedAudioSegment => format!("fmp4-asegment{}-{:05}.mp4", stream, seg),
            AvType::FrameImage => format!("frame-{}-{}.jpeg", stream, request.pts),
        };
        dir.join(name)
    }
}

impl OutputOpener for FileOutputOpener {
    fn open(&self, request: &OutputRequest) -> Result<Box<dyn OutputHandler>, OpenError> {
        let path = self.path_for(request);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(&path)?;

        Ok(Box::new(FileOutput {
            path,
            file,
            written: 0,
        }))
    }
}

struct FileOutput {
    path: PathBuf,
    file: File,
    written: u64,
}

impl OutputHandler for FileOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }

    fn close(&mut self) -> io::Result<()> {
        self.file.flush()?;
        println!("  wrote {} ({} bytes)", self.path.display(), self.written);
        Ok(())
    }

    fn stat(&mut self, _av_type: AvType, event: &StatEvent) -> io::Result<()> {
        if let StatEvent::FrameWritten(frames) = event {
            println!(
                "  {}: {} frames ({} total)",
                self.path.display(),
                frames.frames_written,
                frames.total_frames_written
            );
        }
        Ok(())
    }
}

/// One rendition: opens an init segment, then one output per segment
fn rendition(
    bridge: Arc<Bridge>,
    handle: i64,
    stream_index: i32,
    init_type: AvType,
    segment_type: AvType,
    segment_bytes: usize,
    chunks: mpsc::Receiver<Vec<u8>>,
) -> io::Result<u64> {
    let init = dispatch::open_output(&bridge, handle, stream_index, 0, 0, init_type.as_raw());
    check(init, "open init")?;
    check(dispatch::write_output(&bridge, handle, init, b"ftyp"), "write init")?;
    check(dispatch::close_output(&bridge, handle, init), "close init")?;

    let mut seg_index = 0;
    let mut fd = -1;
    let mut in_segment = 0;
    let mut total = 0u64;
    let mut frames = 0u64;

    for chunk in chunks {
        if fd < 0 || in_segment >= segment_bytes {
            if fd >= 0 {
                check(dispatch::close_output(&bridge, handle, fd), "close segment")?;
            }
            seg_index += 1;
            in_segment = 0;
            let pts = total as i64;
            fd = dispatch::open_output(
                &bridge,
                handle,
                stream_index,
                seg_index,
                pts,
                segment_type.as_raw(),
            );
            check(fd, "open segment")?;
        }

        let mut rest = &chunk[..];
        while !rest.is_empty() {
            let n = check(dispatch::write_output(&bridge, handle, fd, rest), "write")?;
            if n == 0 {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "output stalled"));
            }
            rest = &rest[n as usize..];
        }
        in_segment += chunk.len();
        total += chunk.len() as u64;
        frames += 1;

        dispatch::stat(&bridge, handle, fd, StatEvent::BytesWritten(total));
        dispatch::stat(
            &bridge,
            handle,
            fd,
            StatEvent::FrameWritten(EncodingFrameStats {
                total_frames_written: frames,
                frames_written: 1,
            }),
        );
    }

    if fd >= 0 {
        check(dispatch::close_output(&bridge, handle, fd), "close segment")?;
    }
    Ok(total)
}

fn check(status: i32, what: &str) -> io::Result<i32> {
    if status < 0 {
        return Err(io::Error::other(format!("{} failed", what)));
    }
    Ok(status)
}

fn run(input: &str, out_dir: &Path, segment_bytes: usize) -> io::Result<()> {
    let outputs = FileOutputOpener {
        dir: out_dir.to_path_buf(),
    };
    let bridge = Arc::new(Bridge::with_config(
        BridgeConfig::default().max_outputs_per_session(8),
        FileInputOpener,
        outputs,
    ));

    let (handle, size) = dispatch::open_input(&bridge, input);
    if handle < 0 {
        return Err(io::Error::new(io::ErrorKind::NotFound, input.to_string()));
    }
    println!("Opened {} as handle {} ({} bytes)", input, handle, size);

    let manifest = dispatch::open_output(&bridge, handle, 0, 0, 0, AvType::Manifest.as_raw());
    check(manifest, "open manifest")?;

    let (video_tx, video_rx) = mpsc::channel();
    let (audio_tx, audio_rx) = mpsc::channel();

    let video = {
        let bridge = Arc::clone(&bridge);
        thread::spawn(move || {
            rendition(
                bridge,
                handle,
                0,
                AvType::VideoInit,
                AvType::VideoSegment,
                segment_bytes,
                video_rx,
            )
        })
    };
    let audio = {
        let bridge = Arc::clone(&bridge);
        thread::spawn(move || {
            rendition(
                bridge,
                handle,
                1,
                AvType::AudioInit,
                AvType::AudioSegment,
                segment_bytes,
                audio_rx,
            )
        })
    };

    let mut buf = vec![0u8; 64 * 1024];
    let mut read = 0u64;
    let mut turn = 0u64;
    loop {
        let n = dispatch::read_input(&bridge, handle, &mut buf);
        check(n, "read")?;
        if n == 0 {
            break;
        }
        read += n as u64;
        dispatch::stat(&bridge, handle, -1, StatEvent::BytesRead(read));

        let tx = if turn % 2 == 0 { &video_tx } else { &audio_tx };
        // a rendition thread that bailed out is reported by its join below
        let _ = tx.send(buf[..n as usize].to_vec());
        turn += 1;
    }
    drop(video_tx);
    drop(audio_tx);

    let join = |h: thread::JoinHandle<io::Result<u64>>| -> io::Result<u64> {
        h.join()
            .map_err(|_| io::Error::other("rendition panicked"))?
    };
    let video_bytes = join(video)?;
    let audio_bytes = join(audio)?;

    let mpd = format!(
        "<MPD><!-- video {} bytes, audio {} bytes --></MPD>\n",
        video_bytes, audio_bytes
    );
    check(
        dispatch::write_output(&bridge, handle, manifest, mpd.as_bytes()),
        "write manifest",
    )?;
    check(dispatch::close_output(&bridge, handle, manifest), "close manifest")?;

    let session = Handle::from_raw(handle).and_then(|h| bridge.session(h).ok());
    if let Some(session) = session {
        let stats = session.stats();
        println!(
            "Session stats: read={} written={} outputs={}",
            stats.bytes_read, stats.bytes_written, stats.outputs_opened
        );
    }

    check(dispatch::close_input(&bridge, handle), "close input")?;
    println!("Done: {} bytes read", read);
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("avio_bridge=info".parse().unwrap()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let Some(input) = args.next() else {
        eprintln!("Usage: file_segmenter INPUT [OUT_DIR] [SEGMENT_BYTES]");
        std::process::exit(2);
    };
    let out_dir = PathBuf::from(args.next().unwrap_or_else(|| "out".to_string()));
    let segment_bytes = args
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1_000_000);

    println!("Segmenting {} into {}", input, out_dir.display());

    if let Err(e) = run(&input, &out_dir, segment_bytes) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
