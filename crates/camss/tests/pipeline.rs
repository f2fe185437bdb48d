//! Drive the whole pipeline from threads: one queueing buffers, one playing the hardware, one dequeueing.
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use camss::*;

const BUFFERS: u32 = 150;
const FRAMES: u32 = 400;

fn video_buffer(index: u32) -> Buffer {
    let base = 0x4000_0000 + index * 0x10_0000;
    Buffer::new(index, [base, base + 0x8_0000])
}

#[test]
fn test_threaded_capture() -> anyhow::Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();

    let options = CamssOptions::default();
    let isp = Arc::new(SimulatedIsp::new());
    let done = Arc::new(DoneQueue::for_options(&options));
    let camss = Arc::new(Camss::new(isp.clone(), done.clone(), options)?);
    let irqs = Arc::new(IspIrqs::new(&camss));

    isp.enable_output(true);
    camss.reserve(StreamKind::Yuv)?;
    for i in 0..4 {
        camss.queue_buffer(StreamKind::Yuv, video_buffer(i))?;
    }
    camss.start_stream(StreamKind::Yuv)?;

    let hardware_done = Arc::new(AtomicBool::new(false));

    let hardware = {
        let isp = isp.clone();
        let irqs = irqs.clone();
        let hardware_done = hardware_done.clone();
        std::thread::spawn(move || {
            for _ in 0..FRAMES {
                isp.end_of_frame();
                irqs.line.raise();
                isp.frame_done();
                irqs.isp.raise();
                std::thread::sleep(Duration::from_micros(50));
            }
            hardware_done.store(true, Ordering::Release);
        })
    };

    let producer = {
        let camss = camss.clone();
        std::thread::spawn(move || -> anyhow::Result<()> {
            for i in 4..BUFFERS {
                camss.queue_buffer(StreamKind::Yuv, video_buffer(i))?;
                if camss.stream(StreamKind::Yuv).state().is_idle() {
                    camss.start_stream(StreamKind::Yuv)?;
                }
                std::thread::sleep(Duration::from_micros(if i % 16 == 0 { 500 } else { 60 }));
            }
            Ok(())
        })
    };

    let consumer = {
        let done = done.clone();
        let hardware_done = hardware_done.clone();
        std::thread::spawn(move || {
            let mut got = vec![];
            while !hardware_done.load(Ordering::Acquire) {
                got.extend(done.drain());
                std::thread::yield_now();
            }
            got
        })
    };

    producer.join().expect("producer panicked")?;
    hardware.join().expect("hardware panicked");
    let mut completions = consumer.join().expect("consumer panicked");

    camss.stop_stream(StreamKind::Yuv, BufferState::Error);
    camss.release(StreamKind::Yuv);
    completions.extend(done.drain());

    // Every buffer comes back exactly once.
    let mut seen = HashSet::new();
    for c in completions.iter() {
        assert_eq!(c.stream, StreamKind::Yuv);
        assert!(seen.insert(c.buffer.id()), "buffer {} twice", c.buffer.index());
    }
    assert_eq!(seen.len(), BUFFERS as usize);

    // Filled buffers come back in submission order, numbered without gaps, in time order.
    let filled = completions
        .iter()
        .filter(|c| c.state.is_done())
        .collect::<Vec<_>>();
    assert!(!filled.is_empty());
    for (i, pair) in filled.windows(2).enumerate() {
        assert!(pair[0].buffer.index() < pair[1].buffer.index(), "out of order at {i}");
        assert_eq!(pair[0].buffer.sequence() + 1, pair[1].buffer.sequence());
        assert!(pair[0].buffer.timestamp_ns() <= pair[1].buffer.timestamp_ns());
    }
    assert_eq!(filled[0].buffer.sequence(), 0);

    assert_eq!(camss.stream(StreamKind::Yuv).state(), OutputState::Off);
    Ok(())
}

#[test]
fn test_interrupt_raised_under_stream_lock_runs_on_unlock() -> anyhow::Result<()> {
    let options = CamssOptions::default();
    let isp = Arc::new(SimulatedIsp::new());
    let done = Arc::new(DoneQueue::for_options(&options));
    let camss = Arc::new(Camss::new(isp.clone(), done.clone(), options)?);
    let irqs = IspIrqs::new(&camss);

    isp.enable_output(true);
    camss.queue_buffer(StreamKind::Yuv, video_buffer(0))?;
    camss.queue_buffer(StreamKind::Yuv, video_buffer(1))?;
    camss.start_stream(StreamKind::Yuv)?;

    // The line fires while this thread is inside the stream's critical section.
    isp.end_of_frame();
    let during = camss.stream(StreamKind::Yuv).inspect(|s| {
        let ret = irqs.line.raise();
        (ret, irqs.line.is_latched(), s.active_buf())
    });
    assert_eq!(during, (IrqReturn::None, true, 0));

    // Leaving the critical section delivered it.
    assert!(!irqs.line.is_latched());
    assert_eq!(isp.yuv_addrs(), video_buffer(1).addrs());
    assert!(!isp.status().contains(IspStatus::LINE));
    assert_eq!(irqs.deliver_latched(), IrqReturn::None);
    Ok(())
}
