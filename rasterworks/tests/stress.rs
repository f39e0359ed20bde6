//! Bounded-slot stress harness.
//!
//! A fixed number of slots each hold at most one in-flight open+read; a slot
//! is refilled only when its task finishes. Datasets are randomly reopened
//! or reused, and every read checks the magic pixel.

mod common;

use common::{toolkit, MAGIC_PIXEL, MAGIC_VALUE, SAMPLE};
use futures::stream::{FuturesUnordered, StreamExt};
use rasterworks::native::Window;
use rasterworks::toolkit::{Dataset, Toolkit};
use rasterworks::OperationError;

const SLOTS: usize = 16;
const ITERATIONS: usize = 2_000;
const WORKERS: usize = 4;

/// xorshift64* generator.
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 >> 12;
        self.0 ^= self.0 << 25;
        self.0 ^= self.0 >> 27;
        self.0.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn chance(&mut self, one_in: u64) -> bool {
        self.next() % one_in == 0
    }
}

async fn read_magic(toolkit: Toolkit, reuse: Option<Dataset>) -> Result<Dataset, OperationError> {
    let dataset = match reuse {
        Some(ds) => ds,
        None => toolkit.open_async(SAMPLE)?.await?,
    };
    let band = dataset.band_async(1)?.await?;
    let (x, y) = MAGIC_PIXEL;
    let pixel = band.read_async(Window::new(x, y, 1, 1))?.await?;
    if pixel != vec![MAGIC_VALUE] {
        return Err(OperationError::native(format!(
            "magic pixel mismatch: {pixel:?}"
        )));
    }
    Ok(dataset)
}

async fn run_slot(
    toolkit: Toolkit,
    slot: usize,
    reuse: Option<Dataset>,
) -> (usize, Result<Dataset, OperationError>) {
    (slot, read_magic(toolkit, reuse).await)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bounded_slots_sustained_reads() {
    let (toolkit, _) = toolkit(WORKERS);
    let mut rng = Rng(0x9E37_79B9_7F4A_7C15);
    let mut slots: Vec<Option<Dataset>> = vec![None; SLOTS];
    let mut in_flight = FuturesUnordered::new();

    for (slot, reuse) in slots.iter_mut().enumerate() {
        in_flight.push(run_slot(toolkit.clone(), slot, reuse.take()));
    }

    let mut started = SLOTS;
    let mut finished = 0;
    while let Some((slot, result)) = in_flight.next().await {
        let dataset = result.unwrap();
        finished += 1;
        assert!(in_flight.len() < SLOTS);

        // Keep the dataset for the next round, or drop it and reopen.
        slots[slot] = if rng.chance(3) {
            if rng.chance(2) {
                dataset.close().unwrap();
            }
            None
        } else {
            Some(dataset)
        };

        if started < ITERATIONS {
            in_flight.push(run_slot(toolkit.clone(), slot, slots[slot].take()));
            started += 1;
        }
    }

    assert_eq!(finished, ITERATIONS);
    let stats = toolkit.dispatcher().stats();
    assert!(stats.peak_in_flight <= WORKERS);
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.rejected, 0);
}

#[test]
fn test_blocking_slots_from_threads() {
    let (toolkit, _) = toolkit(WORKERS);
    let threads: Vec<_> = (0..SLOTS)
        .map(|i| {
            let toolkit = toolkit.clone();
            std::thread::spawn(move || {
                let mut rng = Rng(i as u64 + 1);
                let mut dataset = toolkit.open(SAMPLE).unwrap();
                for _ in 0..100 {
                    if rng.chance(4) {
                        dataset = toolkit.open(SAMPLE).unwrap();
                    }
                    let (x, y) = MAGIC_PIXEL;
                    let pixel = dataset
                        .band(1)
                        .unwrap()
                        .read(Window::new(x, y, 1, 1))
                        .unwrap();
                    assert_eq!(pixel, vec![MAGIC_VALUE]);
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }
    assert!(toolkit.dispatcher().stats().peak_in_flight <= WORKERS);
}
