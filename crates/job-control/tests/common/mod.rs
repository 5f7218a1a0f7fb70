#![allow(dead_code)]

pub mod work;
