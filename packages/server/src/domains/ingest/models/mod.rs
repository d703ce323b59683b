pub mod raw_item;
