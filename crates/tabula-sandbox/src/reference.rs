//! Language reference embedded in agent instructions.

/// Description of the table-script language for the LLM.
pub const LANGUAGE_REFERENCE: &str = r#"## Table-script language

Scripts are a sequence of `(def NAME EXPR)` forms evaluated top to bottom.
Later forms can use names defined earlier. `;` starts a comment.

Values: numbers (`3`, `-1.5`), strings (`"text"`), `true`, `false`, `nil`,
lists (`["a" "b"]`), columns, tables, dictionaries and figures.
Calls are written `(operation arg ... :keyword value ...)`.

There is no I/O, no imports and no user-defined functions; only the
operations below exist.

### Access and construction
- `(col T "name")` column of a table
- `(get D "key")` value from a dictionary (or column from a table)
- `(columns T)` list of column names; `(nrows T)` row count
- `(table :a [1 2] :b (col df "x"))` or `(table "a b" [1 2])` new table; scalars repeat
- `(dict "name" value ...)` new dictionary

### Element-wise (columns broadcast against scalars)
- `+`, `-`, `*`, `/`, `%` arithmetic; `+` and `*` accept more than two operands.
  Division always yields floats; division by zero yields nil.
- `abs`, `neg`, `(round x digits)`
- `=`, `!=`, `<`, `<=`, `>`, `>=` comparisons; any comparison with nil is false except `!=`
- `and`, `or`, `not`; nil counts as false
- `is-null`, `(fill-null x value)`
- `upper`, `lower`, `(contains x "sub")`, `(concat-str a b ...)`
- `as-int`, `as-float`, `as-text`

### Aggregates (skip nil)
- `sum`, `mean`, `min`, `max`, `count`

### Table verbs (each returns a new table)
- `(select T "a" "b")`, `(drop T "a")`
- `(rename T "old" "new" ...)`
- `(with-column T "name" EXPR)` add or replace a column
- `(filter T MASK)` keep rows where MASK is true
- `(sort T "a" :descending true)` stable; nil sorts last
- `(head T n)`, `(tail T n)` (default 5)
- `(drop-nulls T :subset ["a"])`, `(distinct T :subset ["a"])`
- `(join L R :on "key" :how "inner"|"left"|"right"|"outer")`; clashing columns get `_x`/`_y`
- `(concat-rows A B ...)`
- `(group-by T ["k"] :agg "sum"|"mean"|"min"|"max"|"count"|"first" :columns ["v"])`
- `(map-numeric T "*" 2)` apply an operator to every numeric column

### Figures (Plotly)
- `(figure :title "...")` empty figure
- `(scatter F :x X :y Y :name "..." :mode "markers" :color "...")`
- `(line F :x X :y Y)`, `(bar F :x X :y Y :orientation "h")`
- `(histogram F :x X)`, `(box F :y Y :x GROUPS)`, `(pie F :labels L :values V)`
- `(update-layout F :title "..." :x-title "..." :y-title "..." :barmode "group" :show-legend true)`

### Example
```
(def expensive (filter df (> (col df "price") 100)))
(def transformed_df (sort expensive "price" :descending true))
```
"#;
