mod catalog_view;
mod painter;
mod suite_view;
mod table;

pub(crate) use self::catalog_view::CatalogView;
pub(crate) use self::painter::Painter;
pub(crate) use self::suite_view::SuiteSummaryView;
pub(crate) use self::table::Table;
