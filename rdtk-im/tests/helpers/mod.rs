//! Test Helper Utilities
//!
//! Shared utilities for rdtk-im integration tests

#![allow(dead_code)]

pub mod db_utils;

pub use db_utils::{
    admin, create_test_services, create_test_services_with, member, seed_book, seed_isbn_row,
    table_snapshot, TestEnv,
};
