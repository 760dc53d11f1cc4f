use dtable::{factory, Blob, Cursor, DTable, Dtype, KeyType, Lookup, MemDTable, Params};
use test_log::test;

fn source_table() -> MemDTable {
    let mut table = MemDTable::new(KeyType::Str);
    for i in 0..200_u32 {
        table
            .insert(
                Dtype::from(format!("row{i:04}").as_str()),
                Some(Blob::from(i.to_le_bytes())),
                true,
            )
            .unwrap();
    }
    table
}

#[test]
fn params_tree_instantiates_wrapper_stack() -> dtable::Result<()> {
    let dir = tempfile::tempdir()?;

    // cache over bloom over array, all resolved by class name
    let config = Params::parse(
        "
        int cache_size 16
        class_dt base bloom
        config base_config {
            class_dt base array
            float fp_rate 0.001
        }
        ",
    )?;

    let source = source_table();
    factory::setup("cache", dir.path(), "stack", &config, &mut *source.iter(), None)?;

    let stack = factory::load("cache", dir.path(), "stack", &config)?;

    assert_eq!(200, stack.len());
    assert_eq!(KeyType::Str, stack.key_type());

    // the stack answers exactly like the source
    for i in (0..200_u32).step_by(13) {
        let key = Dtype::from(format!("row{i:04}").as_str());
        assert_eq!(source.lookup(&key)?, stack.lookup(&key)?);
    }

    assert_eq!(Lookup::Absent, stack.lookup(&"row9999".into())?);

    // iteration passes through the whole stack in order
    let mut cursor = stack.iter();
    let mut count = 0;
    let mut previous: Option<Dtype> = None;

    while cursor.valid() {
        let key = cursor.key();
        if let Some(previous) = &previous {
            assert!(*previous < key);
        }
        previous = Some(key);
        count += 1;
        cursor.next()?;
    }
    assert_eq!(200, count);

    Ok(())
}

#[test]
fn unknown_class_is_rejected() {
    let dir = tempfile::tempdir().unwrap();

    let err = factory::load("no_such_class", dir.path(), "x", &Params::new());
    assert!(matches!(err, Err(dtable::Error::UnknownClass(_))));
}

#[test]
fn wrap_factory_requires_base_param() -> dtable::Result<()> {
    let dir = tempfile::tempdir()?;
    let source = source_table();

    // the cache class has no state of its own; without a base it cannot build
    let err = factory::setup(
        "cache",
        dir.path(),
        "stack",
        &Params::new(),
        &mut *source.iter(),
        None,
    );
    assert!(err.is_err());

    Ok(())
}

#[test]
fn rw_factory_creates_empty_writable_table() -> dtable::Result<()> {
    let dir = tempfile::tempdir()?;

    factory::setup_empty("memory", dir.path(), "writes", &Params::new(), KeyType::UInt32)?;

    let mut table = factory::load("memory", dir.path(), "writes", &Params::new())?;
    assert!(table.writable());
    assert!(table.is_empty());

    table.insert(9_u32.into(), Some(Blob::from(*b"payload")), false)?;
    assert_eq!(
        Lookup::Value(Blob::from(*b"payload")),
        table.lookup(&9_u32.into())?,
    );

    Ok(())
}

#[test]
fn cached_wrap_factory_creates_through_base() -> dtable::Result<()> {
    let dir = tempfile::tempdir()?;

    let config = Params::parse(
        "
        int cache_size 4
        class_dt base array
        ",
    )?;

    let source = source_table();
    factory::setup("cache", dir.path(), "t", &config, &mut *source.iter(), None)?;

    // the files on disk belong to the base class alone
    let bare = factory::load("array", dir.path(), "t", &Params::new())?;
    assert_eq!(200, bare.len());

    let cached = factory::load("cache", dir.path(), "t", &config)?;
    assert_eq!(
        bare.lookup(&"row0005".into())?,
        cached.lookup(&"row0005".into())?,
    );

    Ok(())
}
