use crate::pacing::Pacer;
use crate::publisher::PublishedFrame;
use anyhow::Result;
use mailbox::FrameShape;

/// Synthetic capture source: a moving diagonal gradient.
///
/// Stands in for a real camera driver when bringing the bus up on a bench —
/// every consumer sees a payload that visibly changes each frame and whose
/// contents encode its own frame counter.
pub fn moving_gradient(
    channel: String,
    width: u64,
    height: u64,
    hz: f64,
) -> impl FnOnce(Pacer) -> Box<dyn Iterator<Item = Result<PublishedFrame>> + Send> + Send {
    move |pacer| {
        let shape = match FrameShape::new(&[width, height, 1], 1) {
            Ok(shape) => shape,
            Err(e) => return Box::new(std::iter::once(Err(e.into()))),
        };

        let mut phase = 0u64;
        Box::new(pacer.rate(hz).map(move |tick_ms| {
            phase = phase.wrapping_add(1);
            let mut data = vec![0u8; shape.byte_len()];
            for y in 0..height {
                for x in 0..width {
                    data[(y * width + x) as usize] = (x + y + phase) as u8;
                }
            }
            Ok(PublishedFrame {
                channel: channel.clone(),
                acquired_at_ms: tick_ms,
                shape,
                data,
            })
        }))
    }
}
