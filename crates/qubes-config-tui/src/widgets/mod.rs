pub mod form;
pub mod markup;
pub mod selection;
pub mod sub_tabs;
