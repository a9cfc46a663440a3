use zeropb::{
    schema,
    ErrorKind,
    Layout,
    MessageId,
    MessageSchema,
    Shape,
    Value,
    MessageValue,
    ScalarValue,
    ScalarType,
    MapKey,
    MarshalOptions,
    MapOrder,
    MAX_MESSAGE_LEN,
    marshal,
    marshal_with,
    marshal_to_vec,
    encoded_len,
    unmarshal,
};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;
use std::collections::HashMap;


fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn hello_layout() -> Layout {
    Layout::plan(&schema!(message Hello {
        (world: str),
        (universe: bool),
    })).unwrap()
}

fn hello_value() -> MessageValue {
    MessageValue::new(vec![Value::str("hi"), Value::bool(true)])
}

#[test]
fn test_hello_bytes() {
    init_logging();
    let layout = hello_layout();
    assert_eq!(layout.fixed_size(), 8);
    let mut out = [0; 32];
    let len = marshal(&layout, &hello_value(), &mut out).unwrap();
    assert_eq!(len, 10);
    assert_eq!(&out[..10], &[8, 0, 2, 0, 1, 0, 0, 0, b'h', b'i']);
    assert_eq!(unmarshal(&layout, &out[..10]).unwrap(), hello_value());
}

#[test]
fn test_list_of_scalars_bytes() {
    let layout = Layout::plan(&schema!(message Nums {
        (nums: list(i32)),
    })).unwrap();
    let value = MessageValue::new(vec![
        Value::List(vec![Value::i32(1), Value::i32(2), Value::i32(3)]),
    ]);
    let bytes = marshal_to_vec(&layout, &value, &MarshalOptions::default()).unwrap();
    assert_eq!(bytes, vec![
        4, 0, 3, 0,
        3, 0, 0, 0,
        1, 0, 0, 0,
        2, 0, 0, 0,
        3, 0, 0, 0,
    ]);
    assert_eq!(unmarshal(&layout, &bytes).unwrap(), value);
}

#[test]
fn test_overflow_leaves_memory_past_buffer_untouched() {
    init_logging();
    let layout = hello_layout();
    let value = MessageValue::new(vec![
        Value::str("this string is too long"),
        Value::bool(false),
    ]);
    let mut mem = [0xab; 48];
    let e = marshal(&layout, &value, &mut mem[..16]).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::BufferOverflow);
    assert_eq!(e.field(), Some("world"));
    assert!(mem[16..].iter().all(|&b| b == 0xab));

    // a buffer too small for even the fixed region
    let e = marshal(&layout, &hello_value(), &mut mem[..7]).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::BufferOverflow);
    assert!(mem[7..].iter().all(|&b| b == 0xab));
}

#[test]
fn test_message_length_limit() {
    let layout = Layout::plan(&schema!(message Blobs {
        (a: bytes),
        (b: bytes),
    })).unwrap();
    let max_a = (MAX_MESSAGE_LEN - layout.fixed_size()) as usize;
    let mut out = vec![0; 100_000];

    let fits = MessageValue::new(vec![
        Value::Bytes(vec![7; max_a]),
        Value::Bytes(vec![]),
    ]);
    assert_eq!(marshal(&layout, &fits, &mut out).unwrap(), MAX_MESSAGE_LEN);
    let bytes = marshal_to_vec(&layout, &fits, &MarshalOptions::default()).unwrap();
    assert_eq!(bytes.len(), MAX_MESSAGE_LEN as usize);
    assert_eq!(unmarshal(&layout, &bytes).unwrap(), fits);

    let too_big = MessageValue::new(vec![
        Value::Bytes(vec![7; max_a]),
        Value::Bytes(vec![8]),
    ]);
    let e = marshal(&layout, &too_big, &mut out).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::BufferOverflow);
    assert_eq!(e.field(), Some("b"));
    let e = marshal_to_vec(&layout, &too_big, &MarshalOptions::default()).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::BufferOverflow);

    // a count that cannot fit in a reference header
    let too_many = MessageValue::new(vec![
        Value::Bytes(vec![7; 70_000]),
        Value::Bytes(vec![]),
    ]);
    let e = marshal(&layout, &too_many, &mut out).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::BufferOverflow);
}

#[test]
fn test_empty_values_are_exactly_fixed_size() {
    let layout = Layout::plan(&schema!(message Empty {
        (s: str),
        (b: bytes),
        (l: list(message Item { (x: str) })),
        (m: map(u64)(str)),
        (o: oneof {
            (n: i64),
            (t: str),
        }),
        (inner: message Inner {
            (s: str),
            (f: f64),
        }),
    })).unwrap();
    let zero = MessageValue::zero(&layout, 0);
    assert_eq!(encoded_len(&layout, &zero).unwrap(), layout.fixed_size() as u64);

    let mut out = vec![0xff; 128];
    let len = marshal(&layout, &zero, &mut out).unwrap();
    assert_eq!(len, layout.fixed_size());
    assert!(out[..len as usize].iter().all(|&b| b == 0));
    assert!(out[len as usize..].iter().all(|&b| b == 0xff));
    assert_eq!(unmarshal(&layout, &out[..len as usize]).unwrap(), zero);
}

#[test]
fn test_truncated_input_underflows() {
    let layout = hello_layout();
    let mut out = [0; 10];
    marshal(&layout, &hello_value(), &mut out).unwrap();
    for len in 0..out.len() {
        let e = unmarshal(&layout, &out[..len]).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::BufferUnderflow, "len = {}", len);
    }

    let mut corrupt = out;
    corrupt[0] = 0xff;
    corrupt[1] = 0xff;
    let e = unmarshal(&layout, &corrupt).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::BufferUnderflow);
    assert_eq!(e.field(), Some("world"));

    let mut corrupt = out;
    corrupt[2] = 3;
    assert_eq!(
        unmarshal(&layout, &corrupt).unwrap_err().kind(),
        ErrorKind::BufferUnderflow,
    );
}

#[test]
fn test_aliased_and_backward_segments_rejected() {
    let layout = Layout::plan(&schema!(message Pair {
        (first: str),
        (second: bytes),
    })).unwrap();
    let value = MessageValue::new(vec![Value::str("ab"), Value::Bytes(b"cd".to_vec())]);
    let bytes = marshal_to_vec(&layout, &value, &MarshalOptions::default()).unwrap();
    assert_eq!(bytes, vec![8, 0, 2, 0, 6, 0, 2, 0, b'a', b'b', b'c', b'd']);
    assert_eq!(unmarshal(&layout, &bytes).unwrap(), value);

    let corrupt = |at: usize, rel: u8| {
        let mut corrupt = bytes.clone();
        corrupt[at] = rel;
        unmarshal(&layout, &corrupt).unwrap_err()
    };

    // second shares the first's segment
    let e = corrupt(4, 4);
    assert_eq!(e.kind(), ErrorKind::MalformedData);
    assert_eq!(e.field(), Some("second"));

    // second starts inside the first's segment
    let e = corrupt(4, 5);
    assert_eq!(e.kind(), ErrorKind::MalformedData);
    assert_eq!(e.field(), Some("second"));

    // first points back into the fixed region
    let e = corrupt(0, 2);
    assert_eq!(e.kind(), ErrorKind::MalformedData);
    assert_eq!(e.field(), Some("first"));

    // first skips ahead to the second's segment, so second points backwards
    let e = corrupt(0, 10);
    assert_eq!(e.kind(), ErrorKind::MalformedData);
    assert_eq!(e.field(), Some("second"));
}

/// `levels` nested segments of two entries each, `entry` bytes apiece.
/// Each entry's header sits `header` bytes into it, and both entries'
/// headers reference the next level's segment. `segment_header` is the
/// bytes preceding the entries.
fn fan_out(
    levels: usize,
    segment_header: &[u8],
    entries: [&[u8]; 2],
    last: &[u8],
) -> Vec<u8> {
    let mut buf = vec![4, 0, 2, 0];
    for level in 0..levels {
        buf.extend_from_slice(segment_header);
        if level + 1 == levels {
            buf.extend_from_slice(last);
        } else {
            buf.extend_from_slice(entries[0]);
            buf.extend_from_slice(entries[1]);
        }
    }
    buf
}

#[test]
fn test_fan_out_through_shared_segments_rejected() {
    init_logging();

    // each node's list holds two nodes whose lists are the same segment
    let layout = Layout::plan(&schema!(message Node {
        (kids: list(recurse(1))),
    })).unwrap();
    let lists = |levels| fan_out(
        levels,
        &[2, 0, 0, 0],
        [&[8, 0, 2, 0], &[4, 0, 2, 0]],
        &[0; 8],
    );
    let leaf = Value::Message(MessageValue::new(vec![Value::List(vec![])]));
    assert_eq!(
        unmarshal(&layout, &lists(1)).unwrap().fields,
        vec![Value::List(vec![leaf.clone(), leaf])],
    );
    for levels in [2, 5, 22, 40] {
        let buf = lists(levels);
        let e = unmarshal(&layout, &buf).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::MalformedData, "levels = {}", levels);
    }

    // same through the values of a map
    let layout = Layout::plan(&schema!(message Node {
        (kids: map(u32)(recurse(1))),
    })).unwrap();
    let maps = |levels| fan_out(
        levels,
        &[],
        [&[1, 0, 0, 0, 12, 0, 2, 0], &[2, 0, 0, 0, 4, 0, 2, 0]],
        &[1, 0, 0, 0, 0, 0, 0, 0, 2, 0, 0, 0, 0, 0, 0, 0],
    );
    assert!(unmarshal(&layout, &maps(1)).is_ok());
    for levels in [2, 5, 22, 40] {
        let buf = maps(levels);
        let e = unmarshal(&layout, &buf).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::MalformedData, "levels = {}", levels);
    }
}

#[test]
fn test_nested_round_trip() {
    init_logging();
    let s = schema!(message Order {
        (id: u64),
        (customer: message Customer {
            (name: str),
            (vip: bool),
        }),
        (lines: list(message Line {
            (sku: str),
            (qty: u32),
            (price: f64),
        })),
        (notes: list(str)),
        (matrix: list(list(i64))),
    });
    let layout = Layout::plan(&s).unwrap();
    let line = |sku: &str, qty: u32, price: f64| Value::Message(MessageValue::new(vec![
        Value::str(sku),
        Value::u32(qty),
        Value::Scalar(ScalarValue::F64(price)),
    ]));
    let value = MessageValue::new(vec![
        Value::u64(77),
        Value::Message(MessageValue::new(vec![Value::str("ada"), Value::bool(true)])),
        Value::List(vec![line("a-1", 2, 9.5), line("", 0, 0.0), line("zz", 1, -1.25)]),
        Value::List(vec![Value::str("fragile"), Value::str(""), Value::str("gift")]),
        Value::List(vec![
            Value::List(vec![Value::i64(1), Value::i64(-1)]),
            Value::List(vec![]),
            Value::List(vec![Value::i64(i64::MAX)]),
        ]),
    ]);
    let bytes = marshal_to_vec(&layout, &value, &MarshalOptions::default()).unwrap();
    assert_eq!(bytes.len() as u64, encoded_len(&layout, &value).unwrap());
    assert_eq!(unmarshal(&layout, &bytes).unwrap(), value);
}

#[test]
fn test_map_and_oneof_round_trip() {
    let s = schema!(message Inventory {
        (stock: map(str)(message Item {
            (count: u32),
            (shelf: str),
        })),
        (by_id: map(i32)(bytes)),
        (status: oneof {
            (ok: bool),
            (error: str),
            (moved: message Moved { (to: str), (at: i64) }),
        }),
    });
    let layout = Layout::plan(&s).unwrap();
    let mut stock = HashMap::new();
    for (name, count) in [("apple", 3), ("pear", 0), ("", 12)] {
        stock.insert(MapKey::from(name), Value::Message(MessageValue::new(vec![
            Value::u32(count),
            Value::str(format!("shelf {}", count)),
        ])));
    }
    let mut by_id = HashMap::new();
    by_id.insert(MapKey::I32(-4), Value::Bytes(vec![0, 1, 2]));
    by_id.insert(MapKey::I32(9), Value::Bytes(vec![]));
    for status in [
        Value::Oneof(None),
        Value::oneof(0, Value::bool(true)),
        Value::oneof(1, Value::str("out of stock")),
        Value::oneof(2, Value::Message(MessageValue::new(vec![
            Value::str("warehouse"),
            Value::i64(1_700_000_000),
        ]))),
    ] {
        let value = MessageValue::new(vec![
            Value::Map(stock.clone()),
            Value::Map(by_id.clone()),
            status,
        ]);
        let bytes = marshal_to_vec(&layout, &value, &MarshalOptions::default()).unwrap();
        assert_eq!(unmarshal(&layout, &bytes).unwrap(), value);
    }
}

#[test]
fn test_recursive_tree_round_trip() {
    let layout = Layout::plan(&schema!(message Node {
        (label: str),
        (children: list(recurse(1))),
    })).unwrap();
    let node = |label: &str, children: Vec<Value>| Value::Message(MessageValue::new(vec![
        Value::str(label),
        Value::List(children),
    ]));
    let tree = match node("root", vec![
        node("a", vec![node("a.1", vec![]), node("a.2", vec![])]),
        node("b", vec![]),
        node("c", vec![node("c.1", vec![node("c.1.1", vec![])])]),
    ]) {
        Value::Message(m) => m,
        _ => unreachable!(),
    };
    let bytes = marshal_to_vec(&layout, &tree, &MarshalOptions::default()).unwrap();
    assert_eq!(unmarshal(&layout, &bytes).unwrap(), tree);
}

#[test]
fn test_sorted_maps_are_deterministic() {
    let layout = Layout::plan(&schema!(message Counts {
        (counts: map(str)(u64)),
    })).unwrap();
    let options = MarshalOptions::new().map_order(MapOrder::SortedByKey);
    let words = ["delta", "alpha", "echo", "charlie", "bravo"];

    let mut forward = HashMap::new();
    for (i, word) in words.iter().enumerate() {
        forward.insert(MapKey::from(*word), Value::u64(i as u64));
    }
    let mut backward = HashMap::with_capacity(64);
    for (i, word) in words.iter().enumerate().rev() {
        backward.insert(MapKey::from(*word), Value::u64(i as u64));
    }
    let a = MessageValue::new(vec![Value::Map(forward)]);
    let b = MessageValue::new(vec![Value::Map(backward)]);
    let a_bytes = marshal_to_vec(&layout, &a, &options).unwrap();
    let b_bytes = marshal_to_vec(&layout, &b, &options).unwrap();
    assert_eq!(a_bytes, b_bytes);

    // first entry's key header points at "alpha", the first segment after
    // the entries
    let entries_start = 4;
    let entry_size = 4 + 8;
    let first_string = entries_start + 5 * entry_size;
    assert_eq!(&a_bytes[entries_start..entries_start + 4], &[
        (first_string - entries_start) as u8, 0,
        5, 0,
    ]);
    assert_eq!(&a_bytes[first_string..first_string + 5], b"alpha");
}

#[test]
fn test_nonconforming_value() {
    let layout = hello_layout();
    let value = MessageValue::new(vec![Value::bool(true), Value::str("hi")]);
    let e = marshal(&layout, &value, &mut [0; 32]).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::SchemaNonConformance);
    assert_eq!(e.field(), Some("world"));
}

#[test]
fn test_schema_from_front_end_json() {
    let json = r#"{
        "name": "Event",
        "fields": [
            { "name": "kind", "tag": 1, "kind": { "Scalar": "Enum" } },
            { "name": "payload", "tag": 2, "kind": "Bytes" },
            { "name": "labels", "tag": 5, "kind": { "Map": ["Str", "Str"] } },
            { "name": "next", "tag": 6, "kind": { "List": { "Recurse": 1 } } }
        ]
    }"#;
    let s: MessageSchema = serde_json::from_str(json).unwrap();
    let layout = Layout::plan(&s).unwrap();
    assert_eq!(layout.root().field_offsets(), vec![0, 4, 8, 12]);
    assert_eq!(layout.fixed_size(), 16);

    let mut labels = HashMap::new();
    labels.insert(MapKey::from("env"), Value::str("prod"));
    let value = MessageValue::new(vec![
        Value::Scalar(ScalarValue::Enum(2)),
        Value::Bytes(b"{}".to_vec()),
        Value::Map(labels),
        Value::List(vec![Value::Message(MessageValue::zero(&layout, 0))]),
    ]);
    let bytes = marshal_to_vec(&layout, &value, &MarshalOptions::default()).unwrap();
    assert_eq!(unmarshal(&layout, &bytes).unwrap(), value);
}


fn random_scalar(rng: &mut Pcg32, st: ScalarType) -> ScalarValue {
    match st {
        ScalarType::Bool => ScalarValue::Bool(rng.gen()),
        ScalarType::I32 => ScalarValue::I32(rng.gen()),
        ScalarType::U32 => ScalarValue::U32(rng.gen()),
        ScalarType::Enum => ScalarValue::Enum(rng.gen_range(0..8)),
        ScalarType::F32 => ScalarValue::F32(rng.gen()),
        ScalarType::I64 => ScalarValue::I64(rng.gen()),
        ScalarType::U64 => ScalarValue::U64(rng.gen()),
        ScalarType::F64 => ScalarValue::F64(rng.gen()),
    }
}

fn random_string(rng: &mut Pcg32) -> String {
    let len = rng.gen_range(0..8);
    (0..len).map(|_| rng.gen_range('a'..='z')).collect()
}

fn random_message(rng: &mut Pcg32, layout: &Layout, id: MessageId, depth: usize) -> MessageValue {
    let fields = layout
        .message(id)
        .fields()
        .iter()
        .map(|field| random_value(rng, layout, &field.shape, depth))
        .collect();
    MessageValue::new(fields)
}

fn random_value(rng: &mut Pcg32, layout: &Layout, shape: &Shape, depth: usize) -> Value {
    match shape {
        &Shape::Scalar(st) => Value::Scalar(random_scalar(rng, st)),
        &Shape::Str => Value::Str(random_string(rng)),
        &Shape::Bytes => {
            let len = rng.gen_range(0..6);
            Value::Bytes((0..len).map(|_| rng.gen()).collect())
        }
        &Shape::Message(id) => Value::Message(random_message(rng, layout, id, depth)),
        &Shape::List { ref elem, .. } => {
            let len = if depth >= 3 { 0 } else { rng.gen_range(0..3) };
            Value::List((0..len)
                .map(|_| random_value(rng, layout, elem, depth + 1))
                .collect())
        }
        &Shape::Map { ref key, ref value, .. } => {
            let len = if depth >= 3 { 0 } else { rng.gen_range(0..3) };
            let mut entries = HashMap::new();
            for _ in 0..len {
                let entry_key = match random_value(rng, layout, key, depth + 1) {
                    Value::Str(s) => MapKey::Str(s),
                    Value::Scalar(sv) => MapKey::from_scalar(sv).unwrap(),
                    v => panic!("not a key: {:?}", v),
                };
                let entry_value = random_value(rng, layout, value, depth + 1);
                entries.insert(entry_key, entry_value);
            }
            Value::Map(entries)
        }
        &Shape::Oneof { ref variants, .. } => {
            let choice = rng.gen_range(0..=variants.len());
            if choice == 0 {
                Value::Oneof(None)
            } else {
                let variant = &variants[choice - 1];
                Value::oneof(choice - 1, random_value(rng, layout, &variant.shape, depth))
            }
        }
    }
}

#[test]
fn test_random_round_trips() {
    init_logging();
    let s = schema!(message Doc {
        (id: u64),
        (title: str),
        (score: f64),
        (kind: enum),
        (flags: list(bool)),
        (tags: list(str)),
        (attrs: map(str)(i32)),
        (entries: map(u32)(message Entry {
            (name: str),
            (blob: bytes),
            (weight: f32),
        })),
        (body: oneof {
            (text: str),
            (code: i64),
            (entry: message Ref { (n: i32), (to: str) }),
        }),
        (children: list(recurse(1))),
    });
    let layout = Layout::plan(&s).unwrap();
    let sorted = MarshalOptions::new().map_order(MapOrder::SortedByKey);
    let mut rng = Pcg32::seed_from_u64(0x5eed);
    for _ in 0..200 {
        let value = random_message(&mut rng, &layout, 0, 0);
        let len = encoded_len(&layout, &value).unwrap();

        let mut out = vec![0; len as usize];
        assert_eq!(marshal(&layout, &value, &mut out).unwrap() as u64, len);
        assert_eq!(unmarshal(&layout, &out).unwrap(), value);

        let a = marshal_to_vec(&layout, &value, &sorted).unwrap();
        let mut b = vec![0; a.len() + 8];
        let b_len = marshal_with(&layout, &value, &mut b, &sorted).unwrap();
        assert_eq!(&b[..b_len as usize], &a[..]);
        assert_eq!(unmarshal(&layout, &a).unwrap(), value);
    }
}
