use zeropb::{
    Message,
    Slot,
    Bytes,
    ErrorKind,
    FieldKind,
    Layout,
    MarshalOptions,
    MapOrder,
    MessageSchema,
    FieldSchema,
    ScalarType,
    UnmarshalOptions,
    Value,
    schema,
    marshal_to_vec,
    unmarshal,
};
use std::collections::{BTreeMap, HashMap};


#[derive(Message, Debug, Clone, PartialEq)]
struct Hello {
    world: String,
    universe: bool,
}

#[derive(Message, Debug, Clone, PartialEq)]
struct Node {
    label: String,
    children: Vec<Node>,
}

#[derive(Message, Debug, Clone, PartialEq, Default)]
struct Customer {
    name: String,
    vip: bool,
}

#[derive(Message, Debug, Clone, PartialEq)]
struct Line {
    sku: String,
    qty: u32,
    price: f64,
}

#[derive(Message, Debug, Clone, PartialEq)]
struct Order {
    id: u64,
    customer: Customer,
    lines: Vec<Line>,
    #[zeropb(tag = 20)]
    notes: Vec<String>,
    matrix: Vec<Vec<i64>>,
    attrs: BTreeMap<String, i32>,
    blobs: BTreeMap<u32, Bytes>,
    score: f32,
    delta: i32,
}

#[derive(Message, Debug, Clone, PartialEq)]
struct Nothing;

#[derive(Message, Debug, Clone, PartialEq)]
struct Index {
    counts: HashMap<String, u64>,
    seen: HashMap<i64, bool>,
}

fn order() -> Order {
    let mut attrs = BTreeMap::new();
    attrs.insert("zeta".to_owned(), -3);
    attrs.insert("alpha".to_owned(), 12);
    let mut blobs = BTreeMap::new();
    blobs.insert(40, Bytes(vec![1, 2, 3]));
    blobs.insert(2, Bytes::default());
    Order {
        id: 1234,
        customer: Customer {
            name: "ada".to_owned(),
            vip: true,
        },
        lines: vec![
            Line { sku: "a-1".to_owned(), qty: 2, price: 9.5 },
            Line { sku: String::new(), qty: 0, price: 0.0 },
        ],
        notes: vec!["fragile".to_owned(), String::new()],
        matrix: vec![vec![1, -1], vec![], vec![i64::MIN]],
        attrs,
        blobs,
        score: 0.25,
        delta: -7,
    }
}

#[test]
fn test_hello_bytes() {
    let hello = Hello {
        world: "hi".to_owned(),
        universe: true,
    };
    assert_eq!(Hello::SIZE, 8);
    let bytes = hello.to_zeropb_vec().unwrap();
    assert_eq!(bytes, vec![8, 0, 2, 0, 1, 0, 0, 0, b'h', b'i']);
    assert_eq!(Hello::unmarshal_zeropb(&bytes).unwrap(), hello);
}

#[test]
fn test_derived_schema() {
    assert_eq!(Hello::schema(), schema!(message Hello {
        (world: str),
        (universe: bool),
    }));
    assert_eq!(Node::schema(), schema!(message Node {
        (label: str),
        (children: list(recurse(1))),
    }));
    assert_eq!(Nothing::schema(), MessageSchema::new("Nothing", vec![]));

    let order = Order::schema();
    let tags = order.fields.iter().map(|field| field.tag).collect::<Vec<_>>();
    assert_eq!(tags, vec![1, 2, 3, 20, 5, 6, 7, 8, 9]);
    assert_eq!(order.fields[6], FieldSchema::new(
        "blobs",
        7,
        FieldKind::Map(
            Box::new(FieldKind::Scalar(ScalarType::U32)),
            Box::new(FieldKind::Bytes),
        ),
    ));
}

#[test]
fn test_static_size_agrees_with_layout() {
    let layout = Layout::plan(&Order::schema()).unwrap();
    assert_eq!(Order::SIZE, layout.fixed_size());
    assert_eq!(Order::SIZE, 8 + 8 + 4 + 4 + 4 + 4 + 4 + 4 + 4);
    assert_eq!(layout.root().field_offsets(), vec![0, 8, 16, 20, 24, 28, 32, 36, 40]);
    assert_eq!(Node::SIZE, Layout::plan(&Node::schema()).unwrap().fixed_size());
    assert_eq!(Nothing::SIZE, 0);
}

#[test]
fn test_static_and_dynamic_bytes_agree() {
    let order = order();
    let bytes = order.to_zeropb_vec().unwrap();
    assert_eq!(bytes.len() as u64, order.encoded_len());

    let layout = Layout::plan(&Order::schema()).unwrap();
    let value = unmarshal(&layout, &bytes).unwrap();
    assert_eq!(value.fields[0], Value::u64(1234));
    assert_eq!(value.fields[8], Value::i32(-7));

    // sorted map order is the order `BTreeMap` iterates in
    let options = MarshalOptions::new().map_order(MapOrder::SortedByKey);
    assert_eq!(marshal_to_vec(&layout, &value, &options).unwrap(), bytes);
    assert_eq!(zeropb::encoded_len(&layout, &value).unwrap(), order.encoded_len());

    assert_eq!(Order::unmarshal_zeropb(&bytes).unwrap(), order);
}

#[test]
fn test_tree_round_trip() {
    let leaf = |label: &str| Node {
        label: label.to_owned(),
        children: vec![],
    };
    let tree = Node {
        label: "root".to_owned(),
        children: vec![
            Node {
                label: "a".to_owned(),
                children: vec![leaf("a.1"), leaf("a.2")],
            },
            leaf("b"),
        ],
    };
    let mut out = vec![0; 256];
    let len = tree.marshal_zeropb(&mut out).unwrap() as usize;
    assert_eq!(len as u64, tree.encoded_len());
    assert_eq!(Node::unmarshal_zeropb(&out[..len]).unwrap(), tree);

    let layout = Layout::plan(&Node::schema()).unwrap();
    let value = unmarshal(&layout, &out[..len]).unwrap();
    assert_eq!(marshal_to_vec(&layout, &value, &MarshalOptions::default()).unwrap(), &out[..len]);

    let options = UnmarshalOptions::new().max_depth(2);
    let e = Node::unmarshal_zeropb_with(&out[..len], &options).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::MalformedData);
}

/// `Node` buffer where each level's list holds two nodes whose children
/// headers both reference the next level's list.
fn shared_children(levels: usize) -> Vec<u8> {
    let mut buf = vec![0, 0, 0, 0, 4, 0, 2, 0];
    for level in 0..levels {
        buf.extend_from_slice(&[2, 0, 0, 0]);
        if level + 1 == levels {
            buf.extend_from_slice(&[0; 16]);
        } else {
            buf.extend_from_slice(&[0, 0, 0, 0, 12, 0, 2, 0]);
            buf.extend_from_slice(&[0, 0, 0, 0, 4, 0, 2, 0]);
        }
    }
    buf
}

#[test]
fn test_shared_children_rejected() {
    let leaf = Node {
        label: String::new(),
        children: vec![],
    };
    assert_eq!(
        Node::unmarshal_zeropb(&shared_children(1)).unwrap(),
        Node {
            label: String::new(),
            children: vec![leaf.clone(), leaf],
        },
    );
    for levels in [2, 3, 22] {
        let e = Node::unmarshal_zeropb(&shared_children(levels)).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::MalformedData, "levels = {}", levels);
    }

    // label segment shared with the children list
    let mut buf = vec![8, 0, 2, 0, 4, 0, 1, 0, b'a', b'b'];
    buf.resize(20, 0);
    let e = Node::unmarshal_zeropb(&buf).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::MalformedData);
    assert_eq!(e.field(), Some("children"));
}

#[test]
fn test_duplicate_map_key_rejected() {
    let mut index = Index {
        counts: HashMap::new(),
        seen: HashMap::new(),
    };
    index.seen.insert(5, true);
    index.seen.insert(6, false);
    let mut bytes = index.to_zeropb_vec().unwrap();
    assert_eq!(Index::unmarshal_zeropb(&bytes).unwrap(), index);

    // entries are an i64 key and a bool value; make the second key the first's
    let entries = Index::SIZE as usize;
    let first_key = bytes[entries..entries + 8].to_vec();
    bytes[entries + 12..entries + 20].copy_from_slice(&first_key);
    let e = Index::unmarshal_zeropb(&bytes).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::MalformedData);
    assert_eq!(e.field(), Some("seen"));
}

#[test]
fn test_hash_map_round_trip() {
    let mut index = Index {
        counts: HashMap::new(),
        seen: HashMap::new(),
    };
    for (i, word) in ["one", "two", "three", "four"].iter().enumerate() {
        index.counts.insert(word.to_string(), i as u64);
        index.seen.insert(-(i as i64), i % 2 == 0);
    }
    let bytes = index.to_zeropb_vec().unwrap();
    assert_eq!(bytes.len() as u64, index.encoded_len());
    assert_eq!(Index::unmarshal_zeropb(&bytes).unwrap(), index);
}

#[test]
fn test_unit_message() {
    let bytes = Nothing.to_zeropb_vec().unwrap();
    assert!(bytes.is_empty());
    assert_eq!(Nothing::unmarshal_zeropb(&[]).unwrap(), Nothing);
}

#[test]
fn test_static_errors() {
    let hello = Hello {
        world: "hello".to_owned(),
        universe: false,
    };
    let e = hello.marshal_zeropb(&mut [0; 12]).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::BufferOverflow);
    assert_eq!(e.field(), Some("world"));

    let bytes = hello.to_zeropb_vec().unwrap();
    let e = Hello::unmarshal_zeropb(&bytes[..bytes.len() - 1]).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::BufferUnderflow);

    let mut bad_utf8 = bytes.clone();
    bad_utf8[8] = 0xff;
    let e = Hello::unmarshal_zeropb(&bad_utf8).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::MalformedData);
    assert_eq!(e.field(), Some("world"));

    let order = order();
    let bytes = order.to_zeropb_vec().unwrap();
    let e = Order::unmarshal_zeropb(&bytes[..Order::SIZE as usize + 3]).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::BufferUnderflow);
}
