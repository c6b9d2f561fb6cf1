//! Stress demo: 20 pushing and 20 popping threads move ten million ones
//! through a 16-slot ring, then the per-thread tallies are summed.

use std::sync::Arc;
use std::thread;
use ticket_mpmc::Queue;

const PUSH_VALUE: usize = 1;
const TASK_COUNT: usize = 10_000_000;
const PUSHING_THREADS: usize = 20;
const POPPING_THREADS: usize = 20;

fn main() {
    let tasks = Arc::new(Queue::<usize, 16>::new());

    let mut pushers = vec![];
    for id in 0..PUSHING_THREADS {
        let q = tasks.clone();
        pushers.push(thread::spawn(move || {
            // Low thread ids take one extra item when the total does not
            // divide evenly.
            let mut count = TASK_COUNT / PUSHING_THREADS;
            if TASK_COUNT % PUSHING_THREADS > id {
                count += 1;
            }
            for _ in 0..count {
                q.push(PUSH_VALUE);
            }
        }));
    }

    let mut poppers = vec![];
    for _ in 0..POPPING_THREADS {
        let q = tasks.clone();
        poppers.push(thread::spawn(move || {
            let mut tally = 0usize;
            while let Some(v) = q.pop() {
                tally += v;
            }
            tally
        }));
    }

    for (i, h) in pushers.into_iter().enumerate() {
        h.join().unwrap();
        println!("pushing thread {} completed!", i);
    }
    tasks.close();

    let mut final_result = 0usize;
    for (i, h) in poppers.into_iter().enumerate() {
        let tally = h.join().unwrap();
        println!("popping thread {} completed: {} elements popped", i, tally);
        final_result += tally;
    }

    println!("Value should be:  {}", PUSH_VALUE * TASK_COUNT);
    println!("Calculated value: {}", final_result);
}
