//! Fan-out demo: one coordinator publishes jobs with `push_unsafe`, a pool
//! of workers pops them concurrently, and the coordinator collects results
//! back over a second queue with `pop_unsafe`.

use std::sync::Arc;
use std::thread;
use std::time::Duration;
use ticket_mpmc::Queue;

fn main() {
    println!("Fan-out Example\n");

    const NUM_WORKERS: usize = 4;
    const NUM_JOBS: usize = 20;

    let jobs = Arc::new(Queue::<String, 8>::new());
    let results = Arc::new(Queue::<String, 8>::new());

    let mut workers = vec![];
    for worker_id in 0..NUM_WORKERS {
        let jobs_rx = jobs.clone();
        let results_tx = results.clone();

        workers.push(thread::spawn(move || {
            let mut processed = 0;
            while let Some(job) = jobs_rx.pop() {
                println!("worker {} processing: {}", worker_id, job);

                thread::sleep(Duration::from_millis(20));

                results_tx.push(format!("{} done by worker {}", job, worker_id));
                processed += 1;
            }
            println!("worker {} finished ({} jobs)", worker_id, processed);
        }));
    }

    let jobs_tx = jobs.clone();
    let producer = thread::spawn(move || {
        for i in 0..NUM_JOBS {
            // Safety: the jobs queue has exactly one producer thread.
            unsafe { jobs_tx.push_unsafe(format!("job-{:02}", i)) };
        }
        jobs_tx.close();
        println!("all jobs enqueued");
    });

    producer.join().unwrap();

    let mut collected = 0;
    while collected < NUM_JOBS {
        // Safety: the results queue has exactly one consumer thread.
        if let Some(result) = unsafe { results.pop_unsafe() } {
            println!("result: {}", result);
            collected += 1;
        }
    }

    for worker in workers {
        worker.join().unwrap();
    }

    println!("\nall {} results collected", collected);
}
