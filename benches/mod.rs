use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use libmqtt::codec::{self, PacketType, QoS};
use libmqtt::outbox::Outbox;
use rand::{Rng, SeedableRng, rngs::StdRng};

pub fn bench_encode_publish(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(1);
    let mut payload = [0u8; 256];
    rng.fill(&mut payload[..]);

    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("encode_publish", |b| {
        b.iter(|| codec::publish("bench/topic", &payload, QoS::AtLeastOnce, false, 42).unwrap())
    });
    group.finish();
}

pub fn bench_decode_publish(c: &mut Criterion) {
    let packet = codec::publish("bench/topic", &[7u8; 256], QoS::AtLeastOnce, false, 42).unwrap();

    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Bytes(packet.len() as u64));
    group.bench_function("decode_publish", |b| {
        b.iter(|| {
            let kind = codec::packet_type(&packet).unwrap();
            let id = codec::message_id(&packet);
            let payload = codec::publish_payload(&packet).unwrap();
            (kind, id, payload.len())
        })
    });
    group.finish();
}

pub fn bench_outbox_churn(c: &mut Criterion) {
    let packet = codec::publish("bench/topic", &[7u8; 128], QoS::AtLeastOnce, false, 1).unwrap();

    c.bench_function("outbox_churn", |b| {
        b.iter(|| {
            let mut outbox = Outbox::new();
            for id in 1..=8u16 {
                outbox
                    .put(&packet, id, PacketType::Publish, id as u64, false)
                    .unwrap();
            }
            while let Some(index) = outbox.oldest_not_pending() {
                outbox.mark_dispatched(index);
            }
            for id in 1..=8u16 {
                outbox.delete_by_id_and_kind(id, PacketType::Publish);
            }
            outbox.is_empty()
        })
    });
}

criterion_group!(
    benches,
    bench_encode_publish,
    bench_decode_publish,
    bench_outbox_churn
);
criterion_main!(benches);
