//! Capture video and statistics from a simulated ISP, printing each buffer as it comes back.
//!
//! Run with `RUST_LOG=debug` to see the engine's own logging.
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use camss::*;

const VIDEO_BUFFERS: u32 = 4;
const STATS_BUFFERS: u32 = 3;
const FRAMES: u32 = 12;

fn main() -> Result<()> {
    env_logger::init();

    let options = CamssOptions {
        frame_skip: 2,
        ..Default::default()
    };
    let isp = Arc::new(SimulatedIsp::new());
    let done = Arc::new(DoneQueue::for_options(&options));
    let camss = Arc::new(Camss::new(isp.clone(), done.clone(), options)?);
    let irqs = IspIrqs::new(&camss);

    isp.enable_output(true);
    isp.enable_statistics(true);

    for kind in [StreamKind::Yuv, StreamKind::Scd] {
        camss.reserve(kind)?;
    }
    for i in 0..VIDEO_BUFFERS {
        let base = 0x8000_0000 + i * 0x20_0000;
        camss.queue_buffer(StreamKind::Yuv, Buffer::new(i, [base, base + 0x10_0000]))?;
    }
    for i in 0..STATS_BUFFERS {
        let base = 0x9000_0000 + i * 0x10_0000;
        let stats = Buffer::new(i, [base, base + 0x400]).with_mapping(MappedMemory::zeroed(SC_BUFFER_SIZE));
        camss.queue_buffer(StreamKind::Scd, stats)?;
    }
    camss.start_stream(StreamKind::Yuv)?;
    camss.start_stream(StreamKind::Scd)?;

    let mut hist = [0u32; YHIST_ENTRIES];
    for frame in 0..FRAMES {
        hist.iter_mut().enumerate().for_each(|(i, bin)| *bin = (i as u32 + frame) % 17);
        isp.set_yhist(&hist);

        isp.end_of_frame();
        irqs.line.raise();
        std::thread::sleep(Duration::from_millis(5));
        isp.frame_done();
        irqs.isp.raise();

        while let Some(c) = done.dequeue() {
            report(frame, &c)?;
            // Keep the video stream fed by handing each frame straight back.
            if c.stream == StreamKind::Yuv && frame + 4 < FRAMES {
                let again = Buffer::new(c.buffer.index(), c.buffer.addrs());
                camss.queue_buffer(StreamKind::Yuv, again)?;
                if camss.stream(StreamKind::Yuv).state().is_idle() {
                    camss.start_stream(StreamKind::Yuv)?;
                }
            }
        }
    }

    for kind in [StreamKind::Yuv, StreamKind::Scd] {
        camss.stop_stream(kind, BufferState::Error);
        camss.release(kind);
    }
    for c in done.drain() {
        report(FRAMES, &c)?;
    }

    Ok(())
}

fn report(frame: u32, c: &Completion) -> Result<()> {
    let b = &c.buffer;
    match (c.stream, b.mapping()) {
        (StreamKind::Scd, Some(m)) if c.state.is_done() => {
            let flag = m.read_u16(SC_FLAG_OFFSET)?;
            let bin1 = m.read_u32(SC_Y_HISTOGRAM_OFFSET + 4)?;
            println!(
                "frame {frame:2}: stats {} seq {} at {} ns, flag {flag:#06x}, hist[1] = {bin1}",
                b.index(),
                b.sequence(),
                b.timestamp_ns()
            );
        }
        _ => println!(
            "frame {frame:2}: {:?} {} {:?} seq {} at {} ns",
            c.stream,
            b.index(),
            c.state,
            b.sequence(),
            b.timestamp_ns()
        ),
    }
    Ok(())
}
