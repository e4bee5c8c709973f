pub mod bankart;
