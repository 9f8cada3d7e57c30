use std::sync::Arc;

use chrono::{DateTime, Utc};
use proptest::prelude::*;
use serde_json::{json, Map, Value};

use sqjobs::prelude::*;
use sqjobs::{BrokerId, JsonCodec, Metadata, Payload, PayloadCodec};

#[derive(Default)]
struct Echo;

#[async_trait]
impl Job for Echo {
    const NAME: Option<&'static str> = Some("echo");

    async fn run(&mut self, _ctx: &JobContext, args: &JobArgs) -> HookResult<Outcome> {
        Outcome::success(&args.args)
    }
}

fn arb_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[ -~]{0,12}".prop_map(Value::from),
        prop::collection::vec(any::<i32>(), 0..4).prop_map(|v| json!(v)),
    ]
}

fn arb_args() -> impl Strategy<Value = JobArgs> {
    (
        prop::collection::vec(arb_value(), 0..5),
        prop::collection::btree_map("[a-z_]{1,8}", arb_value(), 0..5),
    )
        .prop_map(|(args, kwargs)| JobArgs {
            args,
            kwargs: kwargs.into_iter().filter(|(k, _)| k != "queue_name").collect::<Map<_, _>>(),
        })
}

fn arb_timestamp() -> impl Strategy<Value = Option<DateTime<Utc>>> {
    // whole seconds up to 2100-01-01
    prop::option::of((0i64..4_102_444_800).prop_map(|secs| DateTime::from_timestamp(secs, 0).unwrap()))
}

fn arb_metadata() -> impl Strategy<Value = Metadata> {
    ("[A-Za-z0-9:-]{1,24}", any::<u32>(), arb_timestamp(), arb_timestamp()).prop_map(
        |(receipt, retries, created_on, first_execution_on)| Metadata {
            id: BrokerId::from(receipt),
            retries,
            created_on,
            first_execution_on,
        },
    )
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn test_payload_survives_transport(args in arb_args()) {
        let connector = MemoryConnector::new();
        let mut registry = JobRegistry::new();
        registry.register::<Echo>();
        let handler = registry.get("echo").unwrap();

        let id = JobId::new();
        let payload = connector.serialize_job("echo", &id, args.clone()).unwrap();
        let bytes = JsonCodec.encode(&payload).unwrap();
        let decoded: Payload = JsonCodec.decode(&bytes).unwrap();
        prop_assert_eq!(&decoded, &payload);

        let instance = connector.unserialize_job(handler.as_ref(), "sqjobs", &decoded).unwrap();
        prop_assert_eq!(instance.context.id, Some(id));
        prop_assert_eq!(instance.context.queue_name, "sqjobs");
        prop_assert_eq!(instance.context.retries, 0);
        prop_assert_eq!(instance.args, args);
    }

    #[test]
    fn test_delivery_metadata_survives_transport(args in arb_args(), metadata in arb_metadata()) {
        let connector = MemoryConnector::new();
        let mut registry = JobRegistry::new();
        registry.register::<Echo>();
        let handler = registry.get("echo").unwrap();

        let id = JobId::new();
        let payload = connector
            .serialize_job("echo", &id, args.clone())
            .unwrap()
            .with_metadata(metadata.clone());
        let bytes = JsonCodec.encode(&payload).unwrap();
        let decoded: Payload = JsonCodec.decode(&bytes).unwrap();
        prop_assert_eq!(decoded.metadata.as_ref(), Some(&metadata));

        let instance = connector.unserialize_job(handler.as_ref(), "sqjobs", &decoded).unwrap();
        prop_assert_eq!(instance.context.id, Some(id));
        prop_assert_eq!(instance.context.broker_id, Some(metadata.id));
        prop_assert_eq!(instance.context.retries, metadata.retries);
        prop_assert_eq!(instance.context.created_on, metadata.created_on);
        prop_assert_eq!(instance.context.first_execution_on, metadata.first_execution_on);
        prop_assert_eq!(instance.args, args);
    }

    #[test]
    fn test_add_job_routes_by_queue_name(queue in "[a-z][a-z0-9_-]{0,15}", args in arb_args()) {
        let rt = runtime();
        let connector = Arc::new(MemoryConnector::new().with_queues([queue.as_str()]));
        let broker = StandardBroker::new(connector.clone());

        let result = rt
            .block_on(broker.add_job::<Echo>(args.clone().kwarg("queue_name", queue.as_str())))
            .unwrap();
        prop_assert_eq!(result.result, None);

        let stored = connector.peek(&queue).unwrap();
        prop_assert_eq!(stored.len(), 1);
        prop_assert_eq!(stored[0].id.as_ref(), Some(&result.job_id));
        prop_assert_eq!(&stored[0].name, "echo");
        prop_assert_eq!(stored[0].job_args(), args);
    }

    #[test]
    fn test_eager_result_matches_worker_result(args in arb_args()) {
        let rt = runtime();
        let mut eager = EagerBroker::default();
        eager.register_job::<Echo>();

        let result = rt.block_on(eager.add_job::<Echo>(args.clone())).unwrap();
        prop_assert_eq!(result.result, Some(Value::Array(args.args)));
    }
}
