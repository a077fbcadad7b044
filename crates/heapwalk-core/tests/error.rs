//! Tests for error handling

use heapwalk_core::error::{HeapError, HeapResult};
use heapwalk_core::types::Address;

#[test]
fn test_configuration_error_display()
{
    let error = HeapError::Configuration("unknown pointer width for riscv64".to_string());
    let message = format!("{}", error);
    assert!(message.contains("ABI"));
    assert!(message.contains("riscv64"));
}

#[test]
fn test_out_of_range_display()
{
    let error = HeapError::OutOfRange { index: 12, count: 10 };
    let message = format!("{}", error);
    assert!(message.contains("12"));
    assert!(message.contains("10"));
}

#[test]
fn test_address_errors_show_hex()
{
    assert_eq!(HeapError::Unreadable(Address::new(0x3000)).to_string(), "Unreadable memory at 0x3000");
    assert_eq!(HeapError::TraversalFault(Address::new(0x3000)).to_string(), "Traversal fault at 0x3000");
    assert_eq!(HeapError::CycleDetected(Address::new(0x1000)).to_string(), "Cycle detected at 0x1000");
}

#[test]
fn test_symbol_not_found_display()
{
    let error = HeapError::SymbolNotFound("main_arena".to_string());
    let message = format!("{}", error);
    assert!(message.contains("Symbol not found"));
    assert!(message.contains("main_arena"));
}

#[test]
fn test_io_error_conversion()
{
    let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
    let error: HeapError = io.into();
    assert!(matches!(error, HeapError::Io(_)));
    assert!(!error.is_local());
}

#[test]
fn test_local_errors()
{
    assert!(HeapError::Unreadable(Address::ZERO).is_local());
    assert!(HeapError::TraversalFault(Address::ZERO).is_local());
    assert!(HeapError::CycleDetected(Address::ZERO).is_local());
    assert!(!HeapError::Configuration(String::new()).is_local());
    assert!(!HeapError::OutOfRange { index: 0, count: 0 }.is_local());
}

#[test]
fn test_result_type()
{
    // Test that Result type is properly aliased
    let _result: HeapResult<()> = Ok(());
    let _error_result: HeapResult<()> = Err(HeapError::SymbolNotFound("main_arena".to_string()));
}
