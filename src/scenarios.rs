//! Scene construction helpers for tests, demos and calibration runs.
//!
//! Mirrors the kinds of geometry the pipeline is exercised with in
//! practice: coaxial parallel squares (which have an analytic solution),
//! optional blockers between them, and clouds of randomly placed
//! rectangles facing a reference square.

use rand::Rng;

use crate::surface::{Role, Surface, SurfaceId, Vertex};

/// Two parallel coaxial squares of side `side`, separated by `distance`
/// along z. The emitter sits in the z = 0 plane.
pub fn coaxial_parallel_squares(side: f64, distance: f64) -> (Surface, Surface) {
    let h = side / 2.0;
    let emitter = Surface::new(
        "emitter_square",
        vec![
            Vertex::new(-h, -h, 0.0),
            Vertex::new(h, -h, 0.0),
            Vertex::new(h, h, 0.0),
            Vertex::new(-h, h, 0.0),
        ],
    );
    let receiver = Surface::new(
        "receiver_square",
        vec![
            Vertex::new(-h, -h, distance),
            Vertex::new(-h, h, distance),
            Vertex::new(h, h, distance),
            Vertex::new(h, -h, distance),
        ],
    );
    (emitter, receiver)
}

/// A square large enough to fully shadow the pair from
/// [`coaxial_parallel_squares`], placed halfway between them. Oversizing
/// by `margin` catches rays leaving near the emitter edges.
pub fn blocking_square(side: f64, distance: f64, margin: f64) -> Surface {
    let h = side / 2.0 + margin;
    Surface::new(
        "blocker_square",
        vec![
            Vertex::new(-h, -h, distance / 2.0),
            Vertex::new(h, -h, distance / 2.0),
            Vertex::new(h, h, distance / 2.0),
            Vertex::new(-h, h, distance / 2.0),
        ],
    )
    .with_role(Role::ReceiverOnly)
}

/// A unit reference square in the z = 0 plane plus `count` random
/// rectangles floating above it, facing down. The reference square emits;
/// the rectangles only receive.
pub fn random_rectangles(
    rng: &mut impl Rng,
    count: usize,
    min_size: f64,
    max_size: f64,
    max_distance: f64,
) -> (Surface, Vec<Surface>) {
    let reference = Surface::new(
        "ref_0",
        vec![
            Vertex::new(0.0, 0.0, 0.0),
            Vertex::new(1.0, 0.0, 0.0),
            Vertex::new(1.0, 1.0, 0.0),
            Vertex::new(0.0, 1.0, 0.0),
        ],
    );

    let receivers = (0..count)
        .map(|i| {
            let width = rng.random_range(min_size..=max_size);
            let length = rng.random_range(min_size..=max_size);
            let cx = rng.random_range(-max_distance..=max_distance);
            let cy = rng.random_range(-max_distance..=max_distance);
            // Keep the rectangle strictly above the reference plane.
            let cz = rng.random_range(min_size..=max_distance.max(2.0 * min_size));

            let id = SurfaceId::from(format!("random_{i}_ref_0"));
            Surface::new(
                id,
                vec![
                    Vertex::new(cx - width / 2.0, cy - length / 2.0, cz),
                    Vertex::new(cx - width / 2.0, cy + length / 2.0, cz),
                    Vertex::new(cx + width / 2.0, cy + length / 2.0, cz),
                    Vertex::new(cx + width / 2.0, cy - length / 2.0, cz),
                ],
            )
            .with_role(Role::ReceiverOnly)
        })
        .collect();

    (reference, receivers)
}
