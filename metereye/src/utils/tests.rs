/// Macro that checks a test fixture exists at compile time before
/// handing back its absolute path.
/// [link](https://stackoverflow.com/questions/30003921/how-can-i-locate-resources-for-testing-with-cargo)
#[macro_export]
macro_rules! test_file_path {
    ($arg1:expr) => {{
        let _ = include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), $arg1));
        let r = concat!(env!("CARGO_MANIFEST_DIR"), $arg1);
        r
    }};
}
