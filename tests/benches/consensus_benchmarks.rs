//! # Consensus Engine Benchmarks
//!
//! Hot paths of the execution loop:
//!
//! | Path | Called |
//! |------|--------|
//! | Classification | once per inbound message |
//! | Ack matching | once per ack and per ackable message |
//! | Replay filter | once per message, per namespace |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fc_consensus::adapters::{
    Ed25519AuthorityOracle, Ed25519Signer, HashChainAssembler, InMemoryChainStore, ManualClock,
    RecordingBroadcast, RecordingInvalidSink, RecordingRequester, RecordingWriteBack,
};
use fc_consensus::domain::{
    Ack, AckMatcher, AuthoritySet, BlockCandidate, BlockWithEntries, CommitChain, DbState,
    FactoidTransaction, Payload, ReplayFilter, ReplayNamespace, ServerEntry, TxAmount,
};
use fc_consensus::ports::BlockAssembler;
use fc_consensus::{ConsensusConfig, ConsensusDependencies, ConsensusEngine, Message, NodeIdentity};
use rand::Rng;
use shared_types::{sha256, Timestamp, ZERO_HASH};
use std::sync::Arc;
use std::time::Duration;

const START: Timestamp = Timestamp::from_secs(1_700_000_000);

fn random_commit(timestamp: Timestamp) -> Arc<Message> {
    let mut rng = rand::thread_rng();
    Message::new(Payload::CommitChain(CommitChain {
        timestamp,
        chain_id: rng.gen(),
        entry_hash: rng.gen(),
        credits: 12,
        ec_address: [0xEC; 32],
    }))
}

fn ack_for(msg: &Message, height: u32) -> Arc<Message> {
    let message_hash = msg.msg_hash();
    Message::new(Payload::Ack(Ack {
        timestamp: START,
        salt: [1; 8],
        salt_number: 7,
        db_height: 1,
        vm_index: 0,
        minute: 0,
        height,
        serial_hash: Ack::serial_after(None, &message_hash),
        message_hash,
        leader_chain_id: [1; 32],
        signature: None,
    }))
}

/// A single-server engine leading height 1.
fn create_leading_engine() -> ConsensusEngine {
    let signer = Ed25519Signer::from_seed([101; 32]);
    let authorities = AuthoritySet::new(
        vec![ServerEntry {
            id: [1; 32],
            signing_key: signer.public_key(),
        }],
        vec![],
    );
    let deps = ConsensusDependencies {
        broadcast: Arc::new(RecordingBroadcast::new()),
        invalid_sink: Arc::new(RecordingInvalidSink::new()),
        store: Arc::new(InMemoryChainStore::new()),
        oracle: Arc::new(Ed25519AuthorityOracle::new()),
        signer: Arc::new(signer),
        requester: Arc::new(RecordingRequester::new()),
        assembler: Arc::new(HashChainAssembler::default()),
        write_back: Arc::new(RecordingWriteBack::new()),
        config: ConsensusConfig::for_testing(),
        identity: NodeIdentity {
            chain_id: [1; 32],
            salt: [1; 32],
        },
        authorities,
    };
    let mut engine =
        ConsensusEngine::new(deps).with_time_source(Box::new(ManualClock::new(START)));

    let genesis = HashChainAssembler::default()
        .seal(
            BlockCandidate {
                db_height: 0,
                prev_key_mr: ZERO_HASH,
                timestamp: START,
                factoid_transactions: vec![FactoidTransaction {
                    timestamp: START,
                    inputs: vec![],
                    outputs: vec![],
                    ec_outputs: vec![TxAmount {
                        address: [0xEC; 32],
                        amount: 1_000_000,
                    }],
                }],
                ..Default::default()
            },
            None,
        )
        .expect("genesis seals");
    let load = Message::local(Payload::DbState(DbState {
        timestamp: START,
        block: BlockWithEntries {
            block: genesis,
            entries: vec![],
        },
        is_last: true,
    }));
    engine.execute(&load).expect("genesis loads");
    engine.process().expect("tick");
    engine
}

// ============================================================================
// Classification
// ============================================================================

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");
    let engine = create_leading_engine();

    let commit = random_commit(START);
    group.bench_function("commit_as_leader", |b| {
        b.iter(|| black_box(engine.classify(&commit)))
    });

    let ack = ack_for(&commit, 0);
    group.bench_function("ack", |b| b.iter(|| black_box(engine.classify(&ack))));

    group.finish();
}

// ============================================================================
// Ack Matching
// ============================================================================

fn bench_ack_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("ack-matcher");
    group.measurement_time(Duration::from_secs(10));

    for size in [10usize, 100, 1_000] {
        let pairs: Vec<_> = (0..size)
            .map(|i| {
                let msg = random_commit(START);
                let ack = ack_for(&msg, i as u32);
                (msg, ack)
            })
            .collect();

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("ack_first", size), &pairs, |b, pairs| {
            b.iter(|| {
                let mut matcher = AckMatcher::new();
                for (msg, ack) in pairs {
                    matcher.add(Arc::clone(ack));
                    matcher.add(Arc::clone(msg));
                }
                black_box(matcher.take_pairs().len())
            })
        });
        group.bench_with_input(BenchmarkId::new("message_first", size), &pairs, |b, pairs| {
            b.iter(|| {
                let mut matcher = AckMatcher::new();
                for (msg, ack) in pairs {
                    matcher.add(Arc::clone(msg));
                    matcher.add(Arc::clone(ack));
                }
                black_box(matcher.take_pairs().len())
            })
        });
    }

    group.finish();
}

// ============================================================================
// Replay Filter
// ============================================================================

fn bench_replay_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay-filter");
    let window_ms = ConsensusConfig::default().filter_time_limit_ms;

    for size in [1_000usize, 10_000] {
        let hashes: Vec<_> = (0..size as u64)
            .map(|i| sha256(&i.to_le_bytes()))
            .collect();

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(
            BenchmarkId::new("check_and_record", size),
            &hashes,
            |b, hashes| {
                b.iter(|| {
                    let mut filter = ReplayFilter::new(window_ms);
                    let accepted = hashes
                        .iter()
                        .filter(|hash| {
                            filter.check_and_record(ReplayNamespace::Internal, hash, START, START)
                        })
                        .count();
                    black_box(accepted)
                })
            },
        );

        let mut seen = ReplayFilter::new(window_ms);
        for hash in &hashes {
            seen.record(ReplayNamespace::Internal, hash, START);
        }
        group.bench_with_input(BenchmarkId::new("replayed", size), &hashes, |b, hashes| {
            b.iter(|| {
                let rejected = hashes
                    .iter()
                    .filter(|hash| !seen.is_valid(ReplayNamespace::Internal, hash, START, START))
                    .count();
                black_box(rejected)
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_classify,
    bench_ack_matching,
    bench_replay_filter
);
criterion_main!(benches);
